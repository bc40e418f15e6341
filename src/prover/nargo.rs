//! Nargo Bridge
//!
//! Drives the `nargo` CLI against two Noir circuits:
//!
//! - the commitment helper, which prints `Field(<signed decimal>)` for a
//!   `(move, salt)` pair;
//! - the reveal circuit, which only produces a witness when `(move, salt)`
//!   opens the given commitment.
//!
//! `nargo` reads its inputs from `Prover.toml` in the circuit directory and
//! writes witnesses to `target/<name>.gz`. Both are scratch files here and
//! are removed on every exit path.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::field::{reduce_field_literal, reduce_hex_literal};
use crate::game::rules::Move;
use crate::prover::{ProverBridge, ProverError};

const PROVER_TOML: &str = "Prover.toml";

/// Markers after which nargo prints a circuit's return value.
const OUTPUT_MARKERS: [&str; 2] = ["Circuit output:", "Returned:"];

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Prover configuration.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// `nargo` executable.
    pub nargo_path: PathBuf,
    /// Commitment helper circuit directory.
    pub commitment_circuit: PathBuf,
    /// Reveal (move/commitment check) circuit directory.
    pub reveal_circuit: PathBuf,
    /// Upper bound for a single toolchain invocation.
    pub timeout: Duration,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            nargo_path: PathBuf::from("nargo"),
            commitment_circuit: PathBuf::from("noir_circuits/commitment_helper"),
            reveal_circuit: PathBuf::from("noir_circuits/rps_logic"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ProverConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nargo_path: std::env::var("NARGO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.nargo_path),
            commitment_circuit: std::env::var("COMMITMENT_CIRCUIT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.commitment_circuit),
            reveal_circuit: std::env::var("REVEAL_CIRCUIT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reveal_circuit),
            timeout: std::env::var("PROVER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

// =============================================================================
// SCRATCH FILES
// =============================================================================

/// Path removed when the guard drops.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    // Drop cannot await; a single unlink of a small file runs inline.
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove scratch file"),
        }
    }
}

fn prover_toml(mv: Move, salt: &str, commitment: Option<&str>) -> String {
    let mut toml = format!("move = \"{}\"\nsalt = \"{}\"\n", mv.as_u8(), salt);
    if let Some(c) = commitment {
        toml.push_str(&format!("commitment = \"{}\"\n", c));
    }
    toml
}

// =============================================================================
// OUTPUT PARSING
// =============================================================================

/// Extract the circuit's return value from nargo stdout as canonical hex.
///
/// Prefers the `Field(<signed decimal>)` form; falls back to a `0x` literal
/// printed after a return-value marker.
pub fn parse_field_output(stdout: &str) -> Result<String, ProverError> {
    let mut rest = stdout;
    while let Some(start) = rest.find("Field(") {
        let after = &rest[start + "Field(".len()..];
        if let Some(end) = after.find(')') {
            let literal = &after[..end];
            let well_formed = !literal.is_empty()
                && literal.chars().all(|c| c == '-' || c.is_ascii_digit());
            if well_formed {
                return Ok(reduce_field_literal(literal)?);
            }
        }
        rest = after;
    }

    for line in stdout.lines() {
        for marker in OUTPUT_MARKERS {
            if let Some(pos) = line.find(marker) {
                let value = line[pos + marker.len()..].trim();
                if value.starts_with("0x") {
                    let token = value.split_whitespace().next().unwrap_or(value);
                    return Ok(reduce_hex_literal(token)?);
                }
            }
        }
    }

    Err(ProverError::OutputParse(stdout.trim().to_string()))
}

// =============================================================================
// NARGO PROVER
// =============================================================================

/// Prover backed by the `nargo` executable.
#[derive(Debug, Clone)]
pub struct NargoProver {
    config: ProverConfig,
}

impl NargoProver {
    /// Create a prover for the configured circuits.
    pub fn new(config: ProverConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Startup checks: both circuits exist and the executable runs.
    ///
    /// Returns the reported toolchain version.
    pub async fn preflight(&self) -> Result<String, ProverError> {
        for (name, dir) in [
            ("commitment", &self.config.commitment_circuit),
            ("reveal", &self.config.reveal_circuit),
        ] {
            if !dir.is_dir() {
                return Err(ProverError::MissingCircuit(dir.clone()));
            }
            if dir.join("target").is_dir() {
                info!(circuit = name, path = %dir.display(), "found compiled circuit target");
            } else {
                warn!(circuit = name, path = %dir.display(), "circuit has no target directory; it may not be compiled");
            }
        }

        let mut cmd = Command::new(&self.config.nargo_path);
        cmd.arg("--version");
        let output = self.run(cmd).await?;
        if !output.status.success() {
            return Err(invocation_error(&output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `nargo execute <witness> --force` inside `circuit`.
    async fn execute(&self, circuit: &Path, witness: &str) -> Result<Output, ProverError> {
        let mut cmd = Command::new(&self.config.nargo_path);
        cmd.arg("execute").arg(witness).arg("--force").current_dir(circuit);
        self.run(cmd).await
    }

    async fn run(&self, mut cmd: Command) -> Result<Output, ProverError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProverError::Timeout(self.config.timeout)),
        }
    }

    async fn write_inputs(&self, circuit: &Path, contents: String) -> Result<ScratchFile, ProverError> {
        let guard = ScratchFile(circuit.join(PROVER_TOML));
        tokio::fs::write(guard.path(), contents).await?;
        Ok(guard)
    }
}

fn invocation_error(output: &Output) -> ProverError {
    ProverError::Invocation {
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn witness_artifact(circuit: &Path, witness: &str) -> PathBuf {
    circuit.join("target").join(format!("{}.gz", witness))
}

#[async_trait]
impl ProverBridge for NargoProver {
    #[instrument(skip_all, fields(mv = mv.as_u8()))]
    async fn derive_commitment(&self, mv: Move, salt: &str) -> Result<String, ProverError> {
        let circuit = &self.config.commitment_circuit;
        let _inputs = self.write_inputs(circuit, prover_toml(mv, salt, None)).await?;

        // The helper's witness is never used; it is still a scratch artifact.
        let witness = format!("rps_commit_witness_{}", uuid::Uuid::new_v4().simple());
        let _artifact = ScratchFile(witness_artifact(circuit, &witness));

        let output = self.execute(circuit, &witness).await?;
        if !output.status.success() {
            let err = invocation_error(&output);
            warn!(error = %err, "commitment derivation failed");
            return Err(err);
        }

        let commitment = parse_field_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(%commitment, "commitment derived");
        Ok(commitment)
    }

    #[instrument(skip_all, fields(mv = mv.as_u8()))]
    async fn verify_reveal(&self, mv: Move, salt: &str, commitment: &str) -> Result<bool, ProverError> {
        let circuit = &self.config.reveal_circuit;
        let _inputs = self
            .write_inputs(circuit, prover_toml(mv, salt, Some(commitment)))
            .await?;

        let witness = format!("rps_reveal_witness_{}", uuid::Uuid::new_v4().simple());
        let artifact = ScratchFile(witness_artifact(circuit, &witness));

        let output = self.execute(circuit, &witness).await?;
        if !output.status.success() {
            info!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "reveal witness rejected"
            );
            return Ok(false);
        }

        let produced = tokio::fs::try_exists(artifact.path()).await.unwrap_or(false);
        if !produced {
            warn!(path = %artifact.path().display(), "nargo succeeded but no witness artifact was written");
        }
        Ok(produced)
    }

    fn name(&self) -> &'static str {
        "nargo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULUS_MINUS_ONE_HEX: &str =
        "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000000";

    #[test]
    fn test_parse_signed_decimal() {
        let out = "[commitment_helper] Circuit witness successfully solved\n\
                   [commitment_helper] Circuit output: Field(-1)\n";
        assert_eq!(parse_field_output(out).unwrap(), MODULUS_MINUS_ONE_HEX);
    }

    #[test]
    fn test_parse_skips_malformed_field() {
        let out = "Field(x) then Field(42)";
        assert_eq!(parse_field_output(out).unwrap(), "0x2a");
    }

    #[test]
    fn test_parse_hex_fallback() {
        let out = "[commitment_helper] Circuit output: 0x00ff\n";
        assert_eq!(parse_field_output(out).unwrap(), "0xff");
    }

    #[test]
    fn test_parse_no_literal() {
        assert!(matches!(
            parse_field_output("Circuit witness successfully solved"),
            Err(ProverError::OutputParse(_))
        ));
    }

    #[test]
    fn test_prover_toml_layout() {
        assert_eq!(prover_toml(Move::Paper, "0xab", None), "move = \"1\"\nsalt = \"0xab\"\n");
        assert_eq!(
            prover_toml(Move::Rock, "0xab", Some("0x12")),
            "move = \"0\"\nsalt = \"0xab\"\ncommitment = \"0x12\"\n"
        );
    }

    #[test]
    fn test_config_default() {
        let config = ProverConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.nargo_path, PathBuf::from("nargo"));
    }

    #[cfg(unix)]
    mod fake_nargo {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        struct Fixture {
            root: TempDir,
            prover: NargoProver,
        }

        impl Fixture {
            fn commitment_dir(&self) -> PathBuf {
                self.root.path().join("commitment_helper")
            }

            fn reveal_dir(&self) -> PathBuf {
                self.root.path().join("rps_logic")
            }
        }

        /// Circuits plus a shell script standing in for `nargo`.
        fn fixture(script_body: &str, timeout: Duration) -> Fixture {
            let root = tempfile::tempdir().unwrap();
            let commitment = root.path().join("commitment_helper");
            let reveal = root.path().join("rps_logic");
            std::fs::create_dir_all(commitment.join("target")).unwrap();
            std::fs::create_dir_all(reveal.join("target")).unwrap();

            let script = root.path().join("nargo");
            std::fs::write(&script, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let prover = NargoProver::new(ProverConfig {
                nargo_path: script,
                commitment_circuit: commitment,
                reveal_circuit: reveal,
                timeout,
            });
            Fixture { root, prover }
        }

        fn target_is_empty(dir: &Path) -> bool {
            std::fs::read_dir(dir.join("target")).unwrap().next().is_none()
        }

        #[tokio::test]
        async fn test_commitment_reduced_and_inputs_removed() {
            let fx = fixture(
                "cp Prover.toml seen.toml\necho '[commitment_helper] Circuit output: Field(-1)'",
                Duration::from_secs(10),
            );
            let commitment = fx.prover.derive_commitment(Move::Rock, "0xabc").await.unwrap();
            assert_eq!(commitment, MODULUS_MINUS_ONE_HEX);

            let seen = std::fs::read_to_string(fx.commitment_dir().join("seen.toml")).unwrap();
            assert_eq!(seen, "move = \"0\"\nsalt = \"0xabc\"\n");
            assert!(!fx.commitment_dir().join(PROVER_TOML).exists());
        }

        #[tokio::test]
        async fn test_commitment_nonzero_exit() {
            let fx = fixture("echo 'constraint failed' >&2\nexit 1", Duration::from_secs(10));
            let err = fx.prover.derive_commitment(Move::Rock, "0x1").await.unwrap_err();
            match err {
                ProverError::Invocation { stderr, .. } => assert_eq!(stderr, "constraint failed"),
                other => panic!("unexpected error {:?}", other),
            }
            assert!(!fx.commitment_dir().join(PROVER_TOML).exists());
        }

        #[tokio::test]
        async fn test_commitment_unparseable_output() {
            let fx = fixture("echo 'Circuit witness successfully solved'", Duration::from_secs(10));
            assert!(matches!(
                fx.prover.derive_commitment(Move::Rock, "0x1").await,
                Err(ProverError::OutputParse(_))
            ));
        }

        #[tokio::test]
        async fn test_reveal_accepted_and_artifact_removed() {
            let fx = fixture(
                "grep -q 'commitment = \"0x5\"' Prover.toml || exit 1\ntouch \"target/$2.gz\"",
                Duration::from_secs(10),
            );
            assert!(fx.prover.verify_reveal(Move::Scissors, "0x1", "0x5").await.unwrap());
            assert!(target_is_empty(&fx.reveal_dir()));
            assert!(!fx.reveal_dir().join(PROVER_TOML).exists());
        }

        #[tokio::test]
        async fn test_reveal_mismatch_is_false() {
            let fx = fixture(
                "grep -q 'commitment = \"0x5\"' Prover.toml || exit 1\ntouch \"target/$2.gz\"",
                Duration::from_secs(10),
            );
            assert!(!fx.prover.verify_reveal(Move::Scissors, "0x1", "0x6").await.unwrap());
            assert!(!fx.reveal_dir().join(PROVER_TOML).exists());
        }

        #[tokio::test]
        async fn test_reveal_without_artifact_is_false() {
            let fx = fixture("exit 0", Duration::from_secs(10));
            assert!(!fx.prover.verify_reveal(Move::Rock, "0x1", "0x2").await.unwrap());
        }

        #[tokio::test]
        async fn test_timeout_kills_invocation() {
            let fx = fixture("sleep 5", Duration::from_millis(100));
            assert!(matches!(
                fx.prover.derive_commitment(Move::Rock, "0x1").await,
                Err(ProverError::Timeout(_))
            ));
            assert!(!fx.commitment_dir().join(PROVER_TOML).exists());
        }

        #[tokio::test]
        async fn test_missing_executable_is_io_error() {
            let mut fx = fixture("exit 0", Duration::from_secs(10));
            fx.prover.config.nargo_path = fx.root.path().join("does-not-exist");
            assert!(matches!(
                fx.prover.verify_reveal(Move::Rock, "0x1", "0x2").await,
                Err(ProverError::Io(_))
            ));
        }

        #[tokio::test]
        async fn test_preflight() {
            let fx = fixture("echo 'nargo version = 0.0.0-test'", Duration::from_secs(10));
            assert_eq!(fx.prover.preflight().await.unwrap(), "nargo version = 0.0.0-test");

            std::fs::remove_dir_all(fx.reveal_dir()).unwrap();
            assert!(matches!(
                fx.prover.preflight().await,
                Err(ProverError::MissingCircuit(_))
            ));
        }
    }
}
