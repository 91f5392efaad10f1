// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! TLS termination (ambient: the listener still needs *some* certificate to
//! speak HTTPS, even though the HTTP dispatch layer itself is out of scope).
//! Self-signed cert generation uses `rcgen` rather than hand-rolled DER —
//! it's already a declared dependency of this crate's TLS stack and is the
//! crate the surrounding ecosystem reaches for here.

use std::fs;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;

use crate::util::config::TlsConfig;

const SELF_SIGNED_SUBJECT_ALT_NAMES: &[&str] = &["localhost", "127.0.0.1"];

/// Gets or generates TLS configuration. If custom paths are provided and
/// both files already exist, loads them as-is. Otherwise generates a
/// self-signed certificate in `storage_dir` (or at the configured paths).
pub fn get_or_generate_tls_config(
	tls_config: Option<&TlsConfig>, storage_dir: &str,
) -> Result<ServerConfig, String> {
	let (cert_path, key_path) = match tls_config {
		Some(config) => (config.cert_path.clone(), config.key_path.clone()),
		None => (format!("{storage_dir}/tls.crt"), format!("{storage_dir}/tls.key")),
	};
	if !fs::exists(&cert_path).unwrap_or(false) || !fs::exists(&key_path).unwrap_or(false) {
		generate_self_signed_cert(&cert_path, &key_path)?;
	}
	load_tls_config(&cert_path, &key_path)
}

fn generate_self_signed_cert(cert_path: &str, key_path: &str) -> Result<(), String> {
	let names: Vec<String> = SELF_SIGNED_SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect();
	let generated = rcgen::generate_simple_self_signed(names)
		.map_err(|e| format!("Failed to generate self-signed certificate: {e}"))?;
	let cert_pem = generated.cert.pem();
	let key_pem = generated.key_pair.serialize_pem();

	if let Some(parent) = std::path::Path::new(cert_path).parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)
				.map_err(|e| format!("Failed to create TLS directory '{}': {e}", parent.display()))?;
		}
	}
	fs::write(cert_path, cert_pem)
		.map_err(|e| format!("Failed to write TLS certificate file '{cert_path}': {e}"))?;
	fs::write(key_path, key_pem)
		.map_err(|e| format!("Failed to write TLS key file '{key_path}': {e}"))?;
	Ok(())
}

fn parse_pem_certs(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
	rustls_pemfile::certs(&mut &*pem_data)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| format!("Failed to parse PEM certificates: {e}"))
}

fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>, String> {
	rustls_pemfile::private_key(&mut &*pem_data)
		.map_err(|e| format!("Failed to parse PEM private key: {e}"))?
		.ok_or_else(|| "No private key found in key file".to_string())
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, String> {
	let cert_pem = fs::read(cert_path)
		.map_err(|e| format!("Failed to read TLS certificate file '{cert_path}': {e}"))?;
	let key_pem =
		fs::read(key_path).map_err(|e| format!("Failed to read TLS key file '{key_path}': {e}"))?;

	let certs = parse_pem_certs(&cert_pem)?;
	if certs.is_empty() {
		return Err("No certificates found in certificate file".to_string());
	}
	let key = parse_pem_private_key(&key_pem)?;

	ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(certs, key)
		.map_err(|e| format!("Failed to build TLS server config: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generate_and_load_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let cert_path = dir.path().join("tls.crt");
		let key_path = dir.path().join("tls.key");

		generate_self_signed_cert(cert_path.to_str().unwrap(), key_path.to_str().unwrap()).unwrap();
		assert!(cert_path.exists());
		assert!(key_path.exists());

		load_tls_config(cert_path.to_str().unwrap(), key_path.to_str().unwrap()).unwrap();
	}

	#[test]
	fn get_or_generate_reuses_existing_files() {
		let dir = tempfile::tempdir().unwrap();
		let cert_path = dir.path().join("tls.crt").to_str().unwrap().to_string();
		let key_path = dir.path().join("tls.key").to_str().unwrap().to_string();
		let config = TlsConfig { cert_path: cert_path.clone(), key_path: key_path.clone() };

		get_or_generate_tls_config(Some(&config), dir.path().to_str().unwrap()).unwrap();
		let first_cert = fs::read(&cert_path).unwrap();
		get_or_generate_tls_config(Some(&config), dir.path().to_str().unwrap()).unwrap();
		let second_cert = fs::read(&cert_path).unwrap();
		assert_eq!(first_cert, second_cert);
	}

	#[test]
	fn parse_empty_certs_yields_empty_vec() {
		assert!(parse_pem_certs(b"").unwrap().is_empty());
	}
}
