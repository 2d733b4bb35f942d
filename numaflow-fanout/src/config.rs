use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::invoker::OffloadPool;

const ENV_FANOUT_CONCURRENCY: &str = "NUMAFLOW_FANOUT_CONCURRENCY";
const ENV_FANOUT_DISCARD_RESULTS: &str = "NUMAFLOW_FANOUT_DISCARD_RESULTS";
const ENV_FANOUT_OFFLOAD: &str = "NUMAFLOW_FANOUT_OFFLOAD";

const UNBOUNDED: &str = "unbounded";

/// Maximum number of invocations allowed to be outstanding at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// One invocation per item. For a sequence this is the number of items, for a queue there
    /// is no cap at all.
    #[default]
    Unbounded,
    Bounded(NonZeroUsize),
}

impl Concurrency {
    pub fn bounded(limit: usize) -> Result<Self> {
        NonZeroUsize::new(limit)
            .map(Concurrency::Bounded)
            .ok_or_else(|| Error::Config("concurrency limit must be a positive integer".into()))
    }

    /// Effective limit for a run. `known_len` is the item count when the source is a sequence.
    pub(crate) fn limit(&self, known_len: Option<usize>) -> usize {
        match (self, known_len) {
            (Concurrency::Bounded(n), _) => n.get(),
            (Concurrency::Unbounded, Some(len)) => len,
            (Concurrency::Unbounded, None) => usize::MAX,
        }
    }
}

impl TryFrom<usize> for Concurrency {
    type Error = Error;

    fn try_from(limit: usize) -> Result<Self> {
        Concurrency::bounded(limit)
    }
}

impl FromStr for Concurrency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(UNBOUNDED) {
            return Ok(Concurrency::Unbounded);
        }
        let limit = s
            .parse::<usize>()
            .map_err(|e| Error::Config(format!("invalid concurrency {s:?}: {e}")))?;
        Concurrency::bounded(limit)
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Unbounded => write!(f, "{UNBOUNDED}"),
            Concurrency::Bounded(n) => write!(f, "{n}"),
        }
    }
}

/// Configuration of a single `map` or `each` run.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub concurrency: Concurrency,
    /// Only count completions, never retain the results. Ignored by `map`.
    pub discard_results: bool,
    /// Pool to dispatch synchronous operations to.
    pub offload: Option<OffloadPool>,
    /// Parent token, the run is cancelled when this token is cancelled.
    pub cancellation: Option<CancellationToken>,
}

impl Config {
    /// Loads the configuration from the given environment variables. Variables that are not set
    /// keep their defaults.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| {
                [
                    ENV_FANOUT_CONCURRENCY,
                    ENV_FANOUT_DISCARD_RESULTS,
                    ENV_FANOUT_OFFLOAD,
                ]
                .contains(&key.as_str())
            })
            .collect();

        let mut config = Config::default();

        if let Some(concurrency) = env_vars.get(ENV_FANOUT_CONCURRENCY) {
            config.concurrency = concurrency.parse().map_err(|e| {
                Error::Config(format!("{ENV_FANOUT_CONCURRENCY} is not valid: {e}"))
            })?;
        }

        if let Some(discard) = env_vars.get(ENV_FANOUT_DISCARD_RESULTS) {
            config.discard_results = discard.trim().to_lowercase().parse().map_err(|e| {
                Error::Config(format!(
                    "{ENV_FANOUT_DISCARD_RESULTS} must be true or false, got {discard:?}: {e}"
                ))
            })?;
        }

        if let Some(offload) = env_vars.get(ENV_FANOUT_OFFLOAD) {
            config.offload = parse_offload(offload)?;
        }

        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_discard_results(mut self, discard_results: bool) -> Self {
        self.discard_results = discard_results;
        self
    }

    pub fn with_offload(mut self, offload: OffloadPool) -> Self {
        self.offload = Some(offload);
        self
    }

    pub fn with_cancellation(mut self, cln_token: CancellationToken) -> Self {
        self.cancellation = Some(cln_token);
        self
    }

    /// Token owned by a single run, child of the configured parent if there is one.
    pub(crate) fn run_token(&self) -> CancellationToken {
        match &self.cancellation {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        }
    }
}

/// Parses `none`, `blocking`, `rayon` or `rayon:<threads>`.
fn parse_offload(value: &str) -> Result<Option<OffloadPool>> {
    let value = value.trim().to_lowercase();
    let (kind, threads) = match value.split_once(':') {
        Some((kind, threads)) => (kind, Some(threads)),
        None => (value.as_str(), None),
    };

    match (kind, threads) {
        ("none", None) => Ok(None),
        ("blocking", None) => Ok(Some(OffloadPool::Blocking)),
        ("rayon", threads) => {
            let mut builder = rayon::ThreadPoolBuilder::new()
                .thread_name(|idx| format!("fanout-offload-{idx}"));
            if let Some(threads) = threads {
                let threads = threads.parse::<usize>().map_err(|e| {
                    Error::Config(format!("{ENV_FANOUT_OFFLOAD} has invalid thread count: {e}"))
                })?;
                builder = builder.num_threads(threads);
            }
            let pool = builder.build().map_err(|e| {
                Error::Config(format!("failed to build the rayon offload pool: {e}"))
            })?;
            Ok(Some(OffloadPool::Rayon(Arc::new(pool))))
        }
        _ => Err(Error::Config(format!(
            "{ENV_FANOUT_OFFLOAD} must be one of none, blocking, rayon or rayon:<threads>, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_bounded_rejects_zero() {
        assert!(matches!(Concurrency::bounded(0), Err(Error::Config(_))));
        assert!(matches!(Concurrency::try_from(0usize), Err(Error::Config(_))));
        assert_eq!(
            Concurrency::bounded(4).unwrap(),
            Concurrency::Bounded(NonZeroUsize::new(4).unwrap())
        );
    }

    #[test]
    fn test_concurrency_limit() {
        let bounded = Concurrency::bounded(3).unwrap();
        assert_eq!(bounded.limit(Some(10)), 3);
        assert_eq!(bounded.limit(None), 3);
        assert_eq!(Concurrency::Unbounded.limit(Some(10)), 10);
        assert_eq!(Concurrency::Unbounded.limit(Some(0)), 0);
        assert_eq!(Concurrency::Unbounded.limit(None), usize::MAX);
    }

    #[test]
    fn test_concurrency_from_str_and_display() {
        assert_eq!(
            "unbounded".parse::<Concurrency>().unwrap(),
            Concurrency::Unbounded
        );
        assert_eq!(
            " UNBOUNDED ".parse::<Concurrency>().unwrap(),
            Concurrency::Unbounded
        );
        let c: Concurrency = "16".parse().unwrap();
        assert_eq!(c.to_string(), "16");
        assert_eq!(Concurrency::Unbounded.to_string(), "unbounded");
        assert!("0".parse::<Concurrency>().is_err());
        assert!("-1".parse::<Concurrency>().is_err());
        assert!("many".parse::<Concurrency>().is_err());
    }

    #[test]
    fn test_config_load_defaults() {
        let config = Config::load(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.concurrency, Concurrency::Unbounded);
        assert!(!config.discard_results);
        assert!(config.offload.is_none());
        assert!(config.cancellation.is_none());
    }

    #[test]
    fn test_config_load_from_env() {
        let env_vars = [
            (ENV_FANOUT_CONCURRENCY, "8"),
            (ENV_FANOUT_DISCARD_RESULTS, "True"),
            (ENV_FANOUT_OFFLOAD, "blocking"),
            ("UNRELATED_VAR", "ignored"),
        ];
        let config = Config::load(env_vars).unwrap();
        assert_eq!(config.concurrency, Concurrency::bounded(8).unwrap());
        assert!(config.discard_results);
        assert!(matches!(config.offload, Some(OffloadPool::Blocking)));
    }

    #[test]
    fn test_config_load_rayon_offload() {
        let config = Config::load([(ENV_FANOUT_OFFLOAD, "rayon:2")]).unwrap();
        match config.offload {
            Some(OffloadPool::Rayon(pool)) => assert_eq!(pool.current_num_threads(), 2),
            other => panic!("expected rayon offload pool, got {other:?}"),
        }

        let config = Config::load([(ENV_FANOUT_OFFLOAD, "none")]).unwrap();
        assert!(config.offload.is_none());
    }

    #[test]
    fn test_config_load_invalid_values() {
        let err = Config::load([(ENV_FANOUT_CONCURRENCY, "0")]).unwrap_err();
        assert!(err.to_string().contains(ENV_FANOUT_CONCURRENCY));

        let err = Config::load([(ENV_FANOUT_DISCARD_RESULTS, "maybe")]).unwrap_err();
        assert!(err.to_string().contains(ENV_FANOUT_DISCARD_RESULTS));

        let err = Config::load([(ENV_FANOUT_OFFLOAD, "gpu")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::load([(ENV_FANOUT_OFFLOAD, "rayon:lots")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_builders_and_run_token() {
        let parent = CancellationToken::new();
        let config = Config::default()
            .with_concurrency(Concurrency::bounded(2).unwrap())
            .with_discard_results(true)
            .with_offload(OffloadPool::Blocking)
            .with_cancellation(parent.clone());

        assert_eq!(config.concurrency, Concurrency::bounded(2).unwrap());
        assert!(config.discard_results);

        let token = config.run_token();
        assert!(!token.is_cancelled());
        parent.cancel();
        assert!(token.is_cancelled());

        // cancelling a run never cancels the parent
        let parent = CancellationToken::new();
        let token = Config::default().with_cancellation(parent.clone()).run_token();
        token.cancel();
        assert!(!parent.is_cancelled());
    }
}
