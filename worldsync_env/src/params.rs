//! Connection parameters and the `<mode> <host> <port> [<worker-id>]`
//! argument convention shared by every worker binary.

use crate::error::EnvError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters a generated worker id suffix is drawn from.
pub const WORKER_ID_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of a generated worker id suffix.
pub const WORKER_ID_SUFFIX_LEN: usize = 4;

const DEFAULT_MODE: &str = "receptionist";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 7777;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Connection flow, e.g. "receptionist"
    pub mode: String,

    /// Coordinator hostname
    pub host: String,

    /// Coordinator port
    pub port: u16,

    /// Worker id (generated when not supplied)
    pub worker_id: String,
}

impl ConnectionParams {
    /// Parses positional arguments (program name excluded).
    ///
    /// - no arguments: local defaults (`receptionist localhost 7777`)
    /// - 3 arguments: `<mode> <host> <port>`, worker id generated
    /// - 4 arguments: `<mode> <host> <port> <worker-id>`
    ///
    /// Anything else is a usage error.
    pub fn from_args<R: Rng + ?Sized>(
        args: &[String],
        worker_type: &str,
        rng: &mut R,
    ) -> Result<Self, EnvError> {
        let defaults;
        let args = if args.is_empty() {
            defaults = vec![
                DEFAULT_MODE.to_string(),
                DEFAULT_HOST.to_string(),
                DEFAULT_PORT.to_string(),
            ];
            &defaults[..]
        } else {
            args
        };

        if args.len() != 3 && args.len() != 4 {
            return Err(EnvError::usage(format!(
                "expected 3 or 4 arguments, got {}",
                args.len()
            )));
        }

        let port = args[2]
            .parse::<u16>()
            .map_err(|_| EnvError::usage(format!("invalid port: {}", args[2])))?;

        let worker_id = match args.get(3) {
            Some(id) => id.clone(),
            None => generate_worker_id(worker_type, rng),
        };

        Ok(Self {
            mode: args[0].clone(),
            host: args[1].clone(),
            port,
            worker_id,
        })
    }

    /// Human-readable usage text.
    pub fn usage(program: &str) -> String {
        format!(
            "Usage: {program} <mode> <hostname> <port> [<worker_id>]\n\
             \n\
             Connects to the world-state coordinator.\n\
             \x20   <mode>          - connection flow, e.g. receptionist.\n\
             \x20   <hostname>      - hostname of the receptionist to connect to.\n\
             \x20   <port>          - port to use if connecting through the receptionist.\n\
             \x20   <worker_id>     - (optional) name of the worker assigned by the coordinator.\n"
        )
    }
}

/// Builds `<worker_type>_<suffix>` with a random suffix.
pub fn generate_worker_id<R: Rng + ?Sized>(worker_type: &str, rng: &mut R) -> String {
    let suffix: String = (0..WORKER_ID_SUFFIX_LEN)
        .map(|_| WORKER_ID_CHARSET[rng.gen_range(0..WORKER_ID_CHARSET.len())] as char)
        .collect();
    format!("{}_{}", worker_type, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args_uses_local_defaults() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let params = ConnectionParams::from_args(&[], "Managed", &mut rng).unwrap();

        assert_eq!(params.mode, "receptionist");
        assert_eq!(params.host, "localhost");
        assert_eq!(params.port, 7777);
        assert!(params.worker_id.starts_with("Managed_"));
    }

    #[test]
    fn test_explicit_worker_id() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let params = ConnectionParams::from_args(
            &args(&["receptionist", "10.0.0.2", "8000", "Managed_0"]),
            "Managed",
            &mut rng,
        )
        .unwrap();

        assert_eq!(params.host, "10.0.0.2");
        assert_eq!(params.port, 8000);
        assert_eq!(params.worker_id, "Managed_0");
    }

    #[test]
    fn test_wrong_arg_count_is_usage_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let err = ConnectionParams::from_args(&args(&["receptionist", "localhost"]), "Managed", &mut rng)
            .unwrap_err();
        assert!(matches!(err, EnvError::Usage(_)));

        let err = ConnectionParams::from_args(
            &args(&["a", "b", "1", "c", "d"]),
            "Managed",
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, EnvError::Usage(_)));
    }

    #[test]
    fn test_bad_port_is_usage_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let err = ConnectionParams::from_args(&args(&["receptionist", "localhost", "port"]), "Managed", &mut rng)
            .unwrap_err();
        assert!(matches!(err, EnvError::Usage(_)));
    }

    #[test]
    fn test_generated_worker_id_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let id = generate_worker_id("myWorker", &mut rng);

        let suffix = id.strip_prefix("myWorker_").unwrap();
        assert_eq!(suffix.len(), WORKER_ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| WORKER_ID_CHARSET.contains(&b)));
    }
}
