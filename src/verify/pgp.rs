//! OpenPGP verification through an external keyring tool.
//!
//! The cryptography stays in the tool; this module only feeds it the
//! signed octets and the detached signature and reads its verdict. The
//! [`PgpVerifier`] trait is the seam; [`GpgCli`] drives GnuPG's command line.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::PgpConfig;
use crate::error::PgpError;
use crate::model::address::EmailAddress;
use crate::model::signature::SignatureVerdict;

/// What the tool concluded about one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgpOutcome {
    pub valid: bool,
    /// Trust level for a good signature, failure reason otherwise.
    pub detail: String,
}

/// Capabilities of an OpenPGP keyring tool.
pub trait PgpVerifier: Send + Sync {
    /// User IDs of every public key in the keyring.
    fn list_keys(&self) -> Result<Vec<String>, PgpError>;

    /// Check a detached signature over `signed`.
    fn verify(&self, signed: &[u8], signature: &[u8]) -> Result<PgpOutcome, PgpError>;

    /// Key IDs a keyserver offers for `email`.
    fn search_keys(&self, email: &str, keyserver: &str) -> Result<Vec<String>, PgpError>;

    /// Import one key from a keyserver.
    fn recv_key(&self, keyserver: &str, key_id: &str) -> Result<(), PgpError>;

    /// Whether a key for `email` is already in the keyring.
    fn find_key(&self, email: &str) -> Result<bool, PgpError> {
        let needle = email.to_ascii_lowercase();
        Ok(self
            .list_keys()?
            .iter()
            .any(|uid| uid.to_ascii_lowercase().contains(&needle)))
    }

    /// Import every key a keyserver offers for `email`; `true` if any arrived.
    fn fetch_key(&self, email: &str, keyserver: &str) -> Result<bool, PgpError> {
        let mut fetched = false;
        for key_id in self.search_keys(email, keyserver)? {
            match self.recv_key(keyserver, &key_id) {
                Ok(()) => fetched = true,
                Err(e) => warn!(key_id = %key_id, error = %e, "Key import failed"),
            }
        }
        Ok(fetched)
    }
}

/// Verify a PGP/MIME signature, fetching the signer's key first when it is
/// missing and a keyserver is configured.
///
/// Tool failures become `Invalid` verdicts.
pub fn verify(
    tool: &dyn PgpVerifier,
    signed: &[u8],
    signature: &[u8],
    sender: Option<&str>,
    keyserver: Option<&str>,
) -> SignatureVerdict {
    let sender = sender
        .map(EmailAddress::parse)
        .filter(|a| !a.address.is_empty());
    if let (Some(sender), Some(keyserver)) = (&sender, keyserver) {
        ensure_key(tool, &sender.address, keyserver);
    }

    match tool.verify(signed, signature) {
        Ok(PgpOutcome { valid: true, detail }) => {
            debug!(trust = %detail, "Good OpenPGP signature");
            SignatureVerdict::Valid
        }
        Ok(PgpOutcome { detail, .. }) => SignatureVerdict::invalid(detail),
        Err(e) => {
            warn!(error = %e, "OpenPGP verification failed");
            SignatureVerdict::invalid(e.to_string())
        }
    }
}

/// Best effort: errors are logged and verification goes ahead regardless.
fn ensure_key(tool: &dyn PgpVerifier, email: &str, keyserver: &str) {
    match tool.find_key(email) {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "Could not list OpenPGP keys");
            return;
        }
    }
    match tool.fetch_key(email, keyserver) {
        Ok(true) => info!(email, keyserver, "Fetched signer key"),
        Ok(false) => debug!(email, keyserver, "Keyserver has no key for signer"),
        Err(e) => warn!(email, keyserver, error = %e, "Key retrieval failed"),
    }
}

/// GnuPG driven through its command line and `--status-fd` protocol.
#[derive(Debug, Clone)]
pub struct GpgCli {
    program: String,
    homedir: Option<PathBuf>,
    timeout: Duration,
}

impl GpgCli {
    pub fn new(config: &PgpConfig) -> Self {
        Self {
            program: config.program.clone(),
            homedir: config.homedir.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--batch", "--no-tty", "--with-colons", "--status-fd", "1"]);
        if let Some(homedir) = &self.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        cmd
    }

    /// Run `cmd` to completion within the timeout.
    ///
    /// Output goes to an anonymous temporary file so a chatty tool can never
    /// block on a full pipe while we wait for it.
    fn run(&self, mut cmd: Command) -> Result<(i32, String), PgpError> {
        let mut stdout = tempfile::tempfile()?;
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PgpError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                // The child may already be gone; nothing to do about either error.
                let _ = child.kill();
                let _ = child.wait();
                return Err(PgpError::Timeout(self.program.clone()));
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        Ok((status.code().unwrap_or(-1), read_all(&mut stdout)?))
    }
}

fn read_all(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn temp_with(data: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

impl PgpVerifier for GpgCli {
    fn list_keys(&self) -> Result<Vec<String>, PgpError> {
        let mut cmd = self.command();
        cmd.arg("--list-keys");
        let (status, output) = self.run(cmd)?;
        // gpg exits with 2 on an empty or missing keyring
        if status != 0 && status != 2 {
            return Err(PgpError::Failed {
                program: self.program.clone(),
                status,
            });
        }
        Ok(parse_colon_uids(&output))
    }

    fn verify(&self, signed: &[u8], signature: &[u8]) -> Result<PgpOutcome, PgpError> {
        let signature_file = temp_with(signature)?;
        let signed_file = temp_with(signed)?;
        let mut cmd = self.command();
        cmd.arg("--verify")
            .arg(signature_file.path())
            .arg(signed_file.path());
        // A bad signature exits non-zero; the status lines tell why
        let (_, output) = self.run(cmd)?;
        Ok(parse_status(&output))
    }

    fn search_keys(&self, email: &str, keyserver: &str) -> Result<Vec<String>, PgpError> {
        let mut cmd = self.command();
        cmd.args(["--keyserver", keyserver, "--search-keys", email]);
        let (_, output) = self.run(cmd)?;
        Ok(parse_search_results(&output))
    }

    fn recv_key(&self, keyserver: &str, key_id: &str) -> Result<(), PgpError> {
        let mut cmd = self.command();
        cmd.args(["--keyserver", keyserver, "--recv-keys", key_id]);
        match self.run(cmd)? {
            (0, _) => Ok(()),
            (status, _) => Err(PgpError::Failed {
                program: self.program.clone(),
                status,
            }),
        }
    }
}

/// Interpret `[GNUPG:]` status lines of a `--verify` run.
pub fn parse_status(output: &str) -> PgpOutcome {
    let mut good = false;
    let mut valid_sig = false;
    let mut failure: Option<String> = None;
    let mut trust: Option<String> = None;

    for line in output.lines() {
        let Some(status) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let mut fields = status.split_whitespace();
        let keyword = fields.next().unwrap_or_default();
        match keyword {
            "GOODSIG" => good = true,
            "VALIDSIG" => valid_sig = true,
            "BADSIG" => failure = Some("bad signature".into()),
            "EXPSIG" => failure = Some("signature expired".into()),
            "EXPKEYSIG" => failure = Some("signing key expired".into()),
            "REVKEYSIG" => failure = Some("signing key revoked".into()),
            "ERRSIG" => {
                // ERRSIG <keyid> <pkalgo> <hashalgo> <sig_class> <time> <rc>
                let rc = fields.nth(5).unwrap_or_default();
                failure = Some(match rc {
                    "9" => "public key not found".into(),
                    "4" => "unsupported algorithm".into(),
                    _ => "signature could not be checked".into(),
                });
            }
            "NODATA" if failure.is_none() => failure = Some("no signature found".into()),
            k if k.starts_with("TRUST_") => {
                trust = Some(format!("trust: {}", k["TRUST_".len()..].to_ascii_lowercase()));
            }
            _ => {}
        }
    }

    match failure {
        None if good && valid_sig => PgpOutcome {
            valid: true,
            detail: trust.unwrap_or_else(|| "trust: unknown".into()),
        },
        Some(reason) => PgpOutcome {
            valid: false,
            detail: reason,
        },
        None => PgpOutcome {
            valid: false,
            detail: "signature could not be checked".into(),
        },
    }
}

/// User IDs from `--with-colons` key listing output (field 10 of `uid` records).
pub fn parse_colon_uids(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("uid:"))
        .filter_map(|line| line.split(':').nth(9))
        .filter(|uid| !uid.is_empty())
        .map(unescape_colon_field)
        .collect()
}

/// Key IDs from `--with-colons --search-keys` output (`pub:<keyid>:...`).
pub fn parse_search_results(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("pub:"))
        .filter_map(|line| line.split(':').nth(1))
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
        .collect()
}

/// Colon listings escape `:` and other octets as `\xNN`.
fn unescape_colon_field(field: &str) -> String {
    let mut out = Vec::with_capacity(field.len());
    let bytes = field.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(byte) = field
                .get(i + 2..i + 4)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
