use std::path::Path;
use std::path::PathBuf;

use rcgen::generate_simple_self_signed;
use rcgen::CertifiedKey;
use tracing::info;

use crate::constants::TLS_CERT_FILE;
use crate::constants::TLS_KEY_FILE;
use crate::file_io::bad_path;
use crate::Result;
use crate::SetupError;

/// Key and certificate handed to every process of a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

/// How a cluster gets its TLS material
#[derive(Debug, Clone, Default)]
pub enum TlsSetting {
    #[default]
    Disabled,
    /// Generate `key.pem` / `cert.pem` in the cluster's output folder
    Generate,
    Provided(TlsMaterial),
}

pub trait CertificateGenerator: Send + Sync {
    /// Writes a key/certificate pair to the given paths
    fn generate(
        &self,
        key_path: &Path,
        cert_path: &Path,
    ) -> Result<()>;
}

/// Self-signed certificate for `localhost`
#[derive(Debug, Default)]
pub struct SelfSignedGenerator;

impl CertificateGenerator for SelfSignedGenerator {
    fn generate(
        &self,
        key_path: &Path,
        cert_path: &Path,
    ) -> Result<()> {
        let subject_alt_names = vec!["localhost".to_string()];
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(subject_alt_names).map_err(|e| SetupError::Tls(e.to_string()))?;

        std::fs::write(cert_path, cert.pem())?;
        std::fs::write(key_path, key_pair.serialize_pem())?;
        Ok(())
    }
}

/// Resolves a [`TlsSetting`] to the files processes should be given
pub(crate) fn prepare_tls(
    setting: &TlsSetting,
    output_folder: &Path,
    generator: &dyn CertificateGenerator,
) -> Result<Option<TlsMaterial>> {
    match setting {
        TlsSetting::Disabled => Ok(None),
        TlsSetting::Provided(material) => {
            for path in [&material.key_path, &material.cert_path] {
                if !path.is_file() {
                    return Err(bad_path(path, "tls file does not exist").into());
                }
            }
            Ok(Some(material.clone()))
        }
        TlsSetting::Generate => {
            let material = TlsMaterial {
                key_path: output_folder.join(TLS_KEY_FILE),
                cert_path: output_folder.join(TLS_CERT_FILE),
            };
            for path in [&material.key_path, &material.cert_path] {
                if path.exists() {
                    return Err(bad_path(path, "would overwrite an existing tls file").into());
                }
            }
            generator.generate(&material.key_path, &material.cert_path)?;
            info!("generated tls material in {:?}", output_folder);
            Ok(Some(material))
        }
    }
}
