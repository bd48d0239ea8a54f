//! Configuration for the federated controllers
//!
//! The simplest way to configure a controller is [`Config::default`], or with
//! the "cli" feature turned on, [`Config::new_from_flags`].

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

const DEFAULT_SECRET_REVIEW_DELAY_SECS: u64 = 10;
const DEFAULT_CLUSTER_AVAILABLE_DELAY_SECS: u64 = 20;
const DEFAULT_SMALL_DELAY_SECS: u64 = 3;
const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 5;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;
const DEFAULT_BACKOFF_GC_PERIOD_SECS: u64 = 60;
const DEFAULT_CLUSTER_PROBE_PERIOD_SECS: u64 = 10;

/// Timing and membership of a federated controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay before a settled object is checked again.
    pub secret_review_delay: Duration,
    /// Delay before reconciling everything once a cluster becomes ready, and
    /// before retrying while caches are still loading.
    pub cluster_available_delay: Duration,
    /// Delay applied to each object of a whole-set reconcile.
    pub small_delay: Duration,
    /// Upper bound on one batch of cluster writes.
    pub update_timeout: Duration,
    /// First retry delay of a failing object.
    pub backoff_initial: Duration,
    /// Largest retry delay of a failing object.
    pub backoff_max: Duration,
    /// How often idle backoff entries are dropped.
    pub backoff_gc_period: Duration,
    /// How often member clusters are health checked.
    pub cluster_probe_period: Duration,
    /// Kubeconfig holding the host and member contexts. The default
    /// kubeconfig is used when absent.
    pub kubeconfig: Option<PathBuf>,
    /// Context of the cluster holding the desired objects. The current
    /// context is used when absent.
    pub host_context: Option<String>,
    /// Contexts of the member clusters.
    pub member_contexts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            secret_review_delay: Duration::from_secs(DEFAULT_SECRET_REVIEW_DELAY_SECS),
            cluster_available_delay: Duration::from_secs(DEFAULT_CLUSTER_AVAILABLE_DELAY_SECS),
            small_delay: Duration::from_secs(DEFAULT_SMALL_DELAY_SECS),
            update_timeout: Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
            backoff_initial: Duration::from_secs(DEFAULT_BACKOFF_INITIAL_SECS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            backoff_gc_period: Duration::from_secs(DEFAULT_BACKOFF_GC_PERIOD_SECS),
            cluster_probe_period: Duration::from_secs(DEFAULT_CLUSTER_PROBE_PERIOD_SECS),
            kubeconfig: None,
            host_context: None,
            member_contexts: Vec::new(),
        }
    }
}

/// A [`Config`] the controllers cannot run with.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A period or timeout is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// The first backoff delay is larger than the largest one.
    #[error("initial backoff {initial:?} is larger than the maximum backoff {max:?}")]
    BackoffRange {
        /// Configured first delay.
        initial: Duration,
        /// Configured largest delay.
        max: Duration,
    },
}

impl Config {
    /// Parses all command line flags and environment variables. The version
    /// of your application is shown by `--version`.
    #[cfg(feature = "cli")]
    pub fn new_from_flags(version: &str) -> Result<Self, ConfigError> {
        let app = Opts::clap().version(version);
        Self::try_from(Opts::from_clap(&app.get_matches()))
    }

    /// Checks the timings. Periods and timeouts must be positive and the
    /// backoff range must not be inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("cluster available delay", self.cluster_available_delay),
            ("update timeout", self.update_timeout),
            ("initial backoff", self.backoff_initial),
            ("backoff gc period", self.backoff_gc_period),
            ("cluster probe period", self.cluster_probe_period),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::Zero(*name));
        }
        if self.backoff_initial > self.backoff_max {
            return Err(ConfigError::BackoffRange {
                initial: self.backoff_initial,
                max: self.backoff_max,
            });
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
impl TryFrom<Opts> for Config {
    type Error = ConfigError;

    fn try_from(opts: Opts) -> Result<Self, Self::Error> {
        let config = Config {
            secret_review_delay: Duration::from_secs(opts.secret_review_delay),
            cluster_available_delay: Duration::from_secs(opts.cluster_available_delay),
            small_delay: Duration::from_secs(opts.small_delay),
            update_timeout: Duration::from_secs(opts.update_timeout),
            backoff_initial: Duration::from_secs(opts.backoff_initial),
            backoff_max: Duration::from_secs(opts.backoff_max),
            backoff_gc_period: Duration::from_secs(opts.backoff_gc_period),
            cluster_probe_period: Duration::from_secs(opts.cluster_probe_period),
            kubeconfig: opts.kubeconfig,
            host_context: opts.host_context,
            member_contexts: opts.member_contexts,
        };
        config.validate()?;
        Ok(config)
    }
}

/// CLI options of a federated controller.
///
/// Flatten them into a larger command with `#[structopt(flatten)]`, or parse
/// them on their own through [`Config::new_from_flags`].
#[derive(StructOpt, Clone, Debug)]
#[cfg(feature = "cli")]
#[structopt(
    name = "federation",
    about = "Keeps objects in sync across member clusters"
)]
pub struct Opts {
    #[structopt(
        long = "kubeconfig",
        env = "FEDFLOW_KUBECONFIG",
        help = "Kubeconfig holding the host and member contexts. Defaults to $KUBECONFIG or ~/.kube/config"
    )]
    kubeconfig: Option<PathBuf>,

    #[structopt(
        long = "host-context",
        env = "FEDFLOW_HOST_CONTEXT",
        help = "Context of the cluster holding the desired objects. Defaults to the current context"
    )]
    host_context: Option<String>,

    #[structopt(
        long = "member-contexts",
        env = "FEDFLOW_MEMBER_CONTEXTS",
        use_delimiter = true,
        help = "Contexts of the member clusters, separated by ','"
    )]
    member_contexts: Vec<String>,

    #[structopt(
        long = "secret-review-delay",
        default_value = "10",
        env = "FEDFLOW_SECRET_REVIEW_DELAY",
        help = "Seconds before a settled secret is checked again"
    )]
    secret_review_delay: u64,

    #[structopt(
        long = "cluster-available-delay",
        default_value = "20",
        env = "FEDFLOW_CLUSTER_AVAILABLE_DELAY",
        help = "Seconds before reconciling everything once a cluster becomes ready"
    )]
    cluster_available_delay: u64,

    #[structopt(
        long = "small-delay",
        default_value = "3",
        env = "FEDFLOW_SMALL_DELAY",
        help = "Seconds before each secret of a whole-set reconcile"
    )]
    small_delay: u64,

    #[structopt(
        long = "update-timeout",
        default_value = "30",
        env = "FEDFLOW_UPDATE_TIMEOUT",
        help = "Seconds allowed for one batch of cluster writes"
    )]
    update_timeout: u64,

    #[structopt(
        long = "backoff-initial",
        default_value = "5",
        env = "FEDFLOW_BACKOFF_INITIAL",
        help = "Seconds before the first retry of a failing secret"
    )]
    backoff_initial: u64,

    #[structopt(
        long = "backoff-max",
        default_value = "60",
        env = "FEDFLOW_BACKOFF_MAX",
        help = "Largest retry delay of a failing secret, in seconds"
    )]
    backoff_max: u64,

    #[structopt(
        long = "backoff-gc-period",
        default_value = "60",
        env = "FEDFLOW_BACKOFF_GC_PERIOD",
        help = "Seconds between sweeps of idle backoff entries"
    )]
    backoff_gc_period: u64,

    #[structopt(
        long = "cluster-probe-period",
        default_value = "10",
        env = "FEDFLOW_CLUSTER_PROBE_PERIOD",
        help = "Seconds between member cluster health checks"
    )]
    cluster_probe_period: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.secret_review_delay, Duration::from_secs(10));
        assert_eq!(config.cluster_available_delay, Duration::from_secs(20));
        assert_eq!(config.small_delay, Duration::from_secs(3));
        assert_eq!(config.update_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_initial, Duration::from_secs(5));
        assert_eq!(config.backoff_max, Duration::from_secs(60));
        assert!(config.member_contexts.is_empty());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_periods_are_rejected() {
        let config = Config {
            backoff_gc_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("backoff gc period")));

        let config = Config {
            cluster_probe_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("cluster probe period"))
        );
    }

    #[test]
    fn inverted_backoff_range_is_rejected() {
        let config = Config {
            backoff_initial: Duration::from_secs(90),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::BackoffRange {
                initial: Duration::from_secs(90),
                max: Duration::from_secs(60),
            })
        );
    }

    #[cfg(feature = "cli")]
    #[test]
    fn flags_match_defaults() {
        let opts = Opts::from_iter_safe(vec![
            "federation",
            "--member-contexts",
            "east,west",
        ])
        .unwrap();
        let config = Config::try_from(opts).unwrap();
        assert_eq!(config.member_contexts, vec!["east", "west"]);
        assert_eq!(
            Config {
                member_contexts: Vec::new(),
                ..config
            },
            Config::default()
        );
    }
    #[cfg(feature = "cli")]
    #[test]
    fn bad_flags_are_an_error() {
        let opts =
            Opts::from_iter_safe(vec!["federation", "--backoff-gc-period", "0"]).unwrap();
        assert_eq!(
            Config::try_from(opts),
            Err(ConfigError::Zero("backoff gc period"))
        );

        let opts = Opts::from_iter_safe(vec![
            "federation",
            "--backoff-initial",
            "120",
            "--backoff-max",
            "60",
        ])
        .unwrap();
        assert!(matches!(
            Config::try_from(opts),
            Err(ConfigError::BackoffRange { .. })
        ));
    }
}
