//! Trust anchors for S/MIME certificate chains.

use std::path::Path;

use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Ref, X509StoreContext, X509};
use tracing::{debug, info};

use crate::config::SmimeConfig;
use crate::error::{MailError, Result};
use crate::model::address::EmailAddress;

/// Reason reported when nothing could anchor the signer's chain.
pub const NO_ANCHOR: &str = "self-signed/unavailable certificate(s)";

/// Root certificates plus CAs trusted only for particular senders.
#[derive(Clone, Default)]
pub struct TrustStore {
    anchors: Vec<X509>,
    account_cas: Vec<(String, X509)>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("anchors", &self.anchors.len())
            .field("account_cas", &self.account_cas.len())
            .finish()
    }
}

impl TrustStore {
    /// Load the configured CA bundle and per-sender CA files.
    pub fn from_config(config: &SmimeConfig) -> Result<Self> {
        let mut store = Self::default();
        if let Some(bundle) = &config.ca_bundle {
            for cert in load_pem_certs(bundle)? {
                store.add_anchor(cert);
            }
        }
        for entry in &config.account_cas {
            for cert in load_pem_certs(&entry.ca_file)? {
                store.add_account_ca(&entry.email, cert);
            }
        }
        info!(
            anchors = store.anchors.len(),
            account_cas = store.account_cas.len(),
            "Loaded S/MIME trust store"
        );
        Ok(store)
    }

    pub fn add_anchor(&mut self, cert: X509) {
        self.anchors.push(cert);
    }

    /// Trust `cert` for messages whose sender is `email`.
    pub fn add_account_ca(&mut self, email: &str, cert: X509) {
        self.account_cas.push((email.trim().to_string(), cert));
    }

    /// Validate `cert` against the anchors plus the CAs registered for
    /// `sender`. `intermediates` are the other certificates shipped with
    /// the signature.
    ///
    /// Returns the reason on failure.
    pub fn verify_chain(
        &self,
        cert: &X509Ref,
        intermediates: &[X509],
        sender: Option<&str>,
    ) -> std::result::Result<(), String> {
        let sender = sender.map(EmailAddress::parse);
        let account = self.account_cas.iter().filter(|(email, _)| {
            sender.as_ref().is_some_and(|s| s.is(email))
        });

        let mut roots: Vec<&X509> = self.anchors.iter().collect();
        roots.extend(account.map(|(_, cert)| cert));
        if roots.is_empty() {
            return Err(NO_ANCHOR.to_string());
        }

        check_chain(cert, intermediates, &roots)
            .inspect_err(|e| debug!(error = %e, "Certificate chain check failed"))
    }
}

fn check_chain(
    cert: &X509Ref,
    intermediates: &[X509],
    roots: &[&X509],
) -> std::result::Result<(), String> {
    let ssl = |e: openssl::error::ErrorStack| e.to_string();

    let mut builder = X509StoreBuilder::new().map_err(ssl)?;
    for root in roots {
        builder.add_cert((*root).clone()).map_err(ssl)?;
    }
    let store = builder.build();

    let mut chain = Stack::new().map_err(ssl)?;
    for extra in intermediates {
        chain.push(extra.clone()).map_err(ssl)?;
    }

    let mut context = X509StoreContext::new().map_err(ssl)?;
    let (ok, error) = context
        .init(&store, cert, &chain, |ctx| {
            let ok = ctx.verify_cert()?;
            Ok((ok, ctx.error()))
        })
        .map_err(ssl)?;
    if ok {
        Ok(())
    } else {
        Err(error.error_string().to_string())
    }
}

/// Read every certificate from a PEM file.
pub fn load_pem_certs(path: &Path) -> Result<Vec<X509>> {
    let pem = std::fs::read(path).map_err(|e| MailError::io(path, e))?;
    let certs = X509::stack_from_pem(&pem).map_err(|e| {
        MailError::Config(format!("{}: invalid PEM certificates: {e}", path.display()))
    })?;
    if certs.is_empty() {
        return Err(MailError::Config(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}
