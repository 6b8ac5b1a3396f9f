//! Certificate Authority (spec §4.1).
//!
//! Persists a self-signed P-256 root CA on disk and mints per-host P-256 leaf
//! certificates for TLS MITM, caching the resulting `rustls::ServerConfig` by
//! host so a warm handshake never re-issues. Grounded in the teacher's
//! `control::caclient` (thiserror error enum, rustls_pemfile parsing,
//! x509_parser inspection) and in `cheddar-proxy`'s `cert_manager.rs` (rcgen
//! `CertificateParams`/`KeyPair`, load-or-generate-root, per-host server-config
//! cache) from the retrieval pack's `other_examples/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rcgen::{
	BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
	ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
	PKCS_ECDSA_P256_SHA256,
};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};

use crate::error::CaError;

const ROOT_KEY_FILE: &str = "rootCA.key.pem";
const ROOT_CERT_FILE: &str = "rootCA.cert.pem";

/// ~10 years, per spec §3 Root CA.
const ROOT_VALIDITY_DAYS: i64 = 365 * 10;
/// <= 825 days, per spec §3 Leaf certificate.
const LEAF_VALIDITY_DAYS: i64 = 825;

/// Persistent root CA plus an in-memory cache of minted leaf TLS server configs.
///
/// Owns the root key/cert and the leaf cache for the process lifetime. A MITM
/// session holds only a shared, non-owning `Arc<Ca>` and never mutates root
/// material (spec §3 Ownership/lifecycle).
pub struct Ca {
	storage_dir: PathBuf,
	root_cert: Certificate,
	root_key: KeyPair,
	root_pem: String,
	root_der: CertificateDer<'static>,
	leaf_cache: Mutex<std::collections::HashMap<String, Arc<ServerConfig>>>,
}

impl Ca {
	/// Load an existing root CA from `storage_dir`, or generate and persist a
	/// fresh one. Fails with `CaError` if the directory is unwritable or
	/// existing files are corrupt — this is fatal at startup (spec §7).
	pub fn load_or_create(storage_dir: impl AsRef<Path>) -> Result<Arc<Self>, CaError> {
		let storage_dir = storage_dir.as_ref().to_path_buf();
		let key_path = storage_dir.join(ROOT_KEY_FILE);
		let cert_path = storage_dir.join(ROOT_CERT_FILE);

		let (root_cert, root_key, root_pem) = if key_path.exists() && cert_path.exists() {
			Self::load_root(&cert_path, &key_path)?
		} else {
			Self::create_root(&storage_dir, &cert_path, &key_path)?
		};

		let root_der = root_cert.der().clone();

		info!(dir = %storage_dir.display(), "root CA ready");
		Ok(Arc::new(Self {
			storage_dir,
			root_cert,
			root_key,
			root_pem,
			root_der,
			leaf_cache: Mutex::new(std::collections::HashMap::new()),
		}))
	}

	fn load_root(
		cert_path: &Path,
		key_path: &Path,
	) -> Result<(Certificate, KeyPair, String), CaError> {
		let cert_pem = fs::read_to_string(cert_path)
			.map_err(|e| CaError::StorageUnwritable(cert_path.to_path_buf(), e))?;
		let key_pem = fs::read_to_string(key_path)
			.map_err(|e| CaError::StorageUnwritable(key_path.to_path_buf(), e))?;

		let key = KeyPair::from_pem(&key_pem)
			.map_err(|e| CaError::CorruptRoot(key_path.to_path_buf(), e.to_string()))?;
		let params = CertificateParams::from_ca_cert_pem(&cert_pem)
			.map_err(|e| CaError::CorruptRoot(cert_path.to_path_buf(), e.to_string()))?;
		let cert = params
			.self_signed(&key)
			.map_err(|e| CaError::CorruptRoot(cert_path.to_path_buf(), e.to_string()))?;

		Ok((cert, key, cert_pem))
	}

	fn create_root(
		storage_dir: &Path,
		cert_path: &Path,
		key_path: &Path,
	) -> Result<(Certificate, KeyPair, String), CaError> {
		let mut dn = DistinguishedName::new();
		dn.push(DnType::CommonName, "Mockpod Root CA");
		dn.push(DnType::OrganizationName, "Mockpod");

		let mut params = CertificateParams::default();
		params.distinguished_name = dn;
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

		let now = OffsetDateTime::now_utc();
		params.not_before = now.checked_sub(TimeDuration::hours(1)).unwrap_or(now);
		params.not_after = now
			.checked_add(TimeDuration::days(ROOT_VALIDITY_DAYS))
			.unwrap_or(now);

		let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
			.map_err(|e| CaError::RootGeneration(e.to_string()))?;
		let cert = params
			.self_signed(&key)
			.map_err(|e| CaError::RootGeneration(e.to_string()))?;

		let cert_pem = cert.pem();
		let key_pem = key.serialize_pem();

		fs::create_dir_all(storage_dir)
			.map_err(|e| CaError::StorageUnwritable(storage_dir.to_path_buf(), e))?;
		atomic_write(cert_path, cert_pem.as_bytes())
			.map_err(|e| CaError::StorageUnwritable(cert_path.to_path_buf(), e))?;
		atomic_write(key_path, key_pem.as_bytes())
			.map_err(|e| CaError::StorageUnwritable(key_path.to_path_buf(), e))?;

		info!(dir = %storage_dir.display(), "generated new root CA");
		Ok((cert, key, cert_pem))
	}

	/// PEM encoding of the root certificate, for export to client devices (§4.1).
	pub fn root_ca_pem(&self) -> String {
		self.root_pem.clone()
	}

	/// DER encoding of the root certificate, for the `/mockpod/cert` download (§4.8).
	pub fn root_ca_der(&self) -> Vec<u8> {
		self.root_der.to_vec()
	}

	pub fn storage_dir(&self) -> &Path {
		&self.storage_dir
	}

	/// Return a TLS server config for `host`, minting a fresh leaf certificate
	/// on first use and caching it thereafter (§4.1: "must never re-issue for a
	/// host already present").
	pub fn leaf_tls_server_config(&self, host: &str) -> Result<Arc<ServerConfig>, CaError> {
		let key = host.to_ascii_lowercase();

		if let Some(cfg) = self.leaf_cache.lock().get(&key).cloned() {
			return Ok(cfg);
		}

		let (chain, private_key) = self.issue_leaf(&key)?;
		let mut config = ServerConfig::builder()
			.with_no_client_auth()
			.with_single_cert(chain, private_key)
			.map_err(|e| CaError::TlsConfig {
				host: key.clone(),
				source: e.to_string(),
			})?;
		config.alpn_protocols = vec![b"http/1.1".to_vec()];

		let config = Arc::new(config);
		self.leaf_cache.lock().insert(key, config.clone());
		Ok(config)
	}

	fn issue_leaf(
		&self,
		host: &str,
	) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CaError> {
		let mut params = CertificateParams::default();

		let mut dn = DistinguishedName::new();
		dn.push(DnType::CommonName, host);
		params.distinguished_name = dn;
		params.is_ca = IsCa::NoCa;
		params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
		params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
		params.subject_alt_names = vec![SanType::DnsName(Ia5String::try_from(host).map_err(
			|_| CaError::LeafIssueFailed {
				host: host.to_string(),
				source: "host is not a valid DNS name".to_string(),
			},
		)?)];

		let now = OffsetDateTime::now_utc();
		params.not_before = now.checked_sub(TimeDuration::hours(1)).unwrap_or(now);
		params.not_after = now
			.checked_add(TimeDuration::days(LEAF_VALIDITY_DAYS))
			.unwrap_or(now);

		let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
			CaError::LeafIssueFailed {
				host: host.to_string(),
				source: e.to_string(),
			}
		})?;
		let cert = params
			.signed_by(&key, &self.root_cert, &self.root_key)
			.map_err(|e| CaError::LeafIssueFailed {
				host: host.to_string(),
				source: e.to_string(),
			})?;

		let chain = vec![cert.der().clone(), self.root_der.clone()];
		let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
		Ok((chain, private_key))
	}

	/// Number of distinct hosts with a cached leaf config, for `ProxyCore::stats()`.
	pub fn leaf_cache_size(&self) -> usize {
		self.leaf_cache.lock().len()
	}
}

/// Write-once, then read-only: write to a temp file and rename into place so a
/// concurrent reader never observes a half-written PEM file (spec §4.1 "Atomic
/// write-on-create").
fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
	let tmp_path = path.with_extension("tmp");
	fs::write(&tmp_path, contents)?;
	match fs::rename(&tmp_path, path) {
		Ok(()) => Ok(()),
		Err(e) => {
			let _ = fs::remove_file(&tmp_path);
			warn!(path = %path.display(), error = %e, "atomic rename failed");
			Err(e)
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn generates_root_once_and_reuses_on_reload() {
		let dir = tempdir().unwrap();
		let pem_first = {
			let ca = Ca::load_or_create(dir.path()).unwrap();
			ca.root_ca_pem()
		};
		let pem_second = {
			let ca = Ca::load_or_create(dir.path()).unwrap();
			ca.root_ca_pem()
		};
		assert_eq!(pem_first, pem_second);
	}

	#[test]
	fn pem_to_der_round_trip_is_byte_identical() {
		let dir = tempdir().unwrap();
		let ca = Ca::load_or_create(dir.path()).unwrap();
		let der_from_method = ca.root_ca_der();

		let (_label, der_from_pem) =
			rustls_pemfile::read_one(&mut std::io::Cursor::new(ca.root_ca_pem().as_bytes()))
				.unwrap()
				.map(|item| match item {
					rustls_pemfile::Item::X509Certificate(der) => ("cert", der.to_vec()),
					_ => panic!("expected a certificate PEM block"),
				})
				.unwrap();

		assert_eq!(der_from_method, der_from_pem);
	}

	#[test]
	fn leaf_cert_is_cached_per_host() {
		let dir = tempdir().unwrap();
		let ca = Ca::load_or_create(dir.path()).unwrap();
		let first = ca.leaf_tls_server_config("example.test").unwrap();
		let second = ca.leaf_tls_server_config("example.test").unwrap();
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(ca.leaf_cache_size(), 1);
	}

	#[test]
	fn leaf_cert_san_matches_host() {
		let dir = tempdir().unwrap();
		let ca = Ca::load_or_create(dir.path()).unwrap();
		let (chain, _key) = ca.issue_leaf("api.example.test").unwrap();
		let (_, parsed) = x509_parser::parse_x509_certificate(&chain[0]).unwrap();
		let sans: Vec<_> = parsed
			.subject_alternative_name()
			.unwrap()
			.unwrap()
			.value
			.general_names
			.iter()
			.filter_map(|n| match n {
				x509_parser::extensions::GeneralName::DNSName(d) => Some(*d),
				_ => None,
			})
			.collect();
		assert_eq!(sans, vec!["api.example.test"]);
	}
}
