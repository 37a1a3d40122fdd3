use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context};
use time::UtcOffset;

use crate::clock::parse_offset;
use crate::widget::Goals;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// A century; also keeps the day count clear of `time::Duration` overflow.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub ledger_path: PathBuf,
    pub widget_snapshot_path: PathBuf,
    pub image_dir: PathBuf,
    /// S3/MinIO image store; local `image_dir` when unset.
    pub s3: Option<S3Config>,
    pub inference_endpoint: String,
    pub inference_timeout: Duration,
    pub widget_debounce: Duration,
    pub rollover_check: Duration,
    pub retention_days: i64,
    /// Overrides the detected host offset.
    pub local_offset: Option<UtcOffset>,
    pub goals: Goals,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            ledger_path: "data/ledger.json".into(),
            widget_snapshot_path: "data/widget.json".into(),
            image_dir: "data/images".into(),
            s3: None,
            inference_endpoint: "http://localhost:8000".into(),
            inference_timeout: Duration::from_secs(30),
            widget_debounce: Duration::from_millis(200),
            rollover_check: Duration::from_secs(60),
            retention_days: 365,
            local_offset: None,
            goals: Goals::default(),
        }
    }
}

impl AppConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let num = |k: &str, default: u64| -> anyhow::Result<u64> {
            match var(k) {
                Some(v) => v.trim().parse::<u64>().with_context(|| format!("{} must be a whole number", k)),
                None => Ok(default),
            }
        };
        let goal = |k: &str, default: f64| -> anyhow::Result<f64> {
            match var(k) {
                Some(v) => v.trim().parse::<f64>().with_context(|| format!("{} must be a number", k)),
                None => Ok(default),
            }
        };

        let s3 = match (
            var("MINIO_ENDPOINT"),
            var("MINIO_BUCKET"),
            var("MINIO_ACCESS_KEY"),
            var("MINIO_SECRET_KEY"),
        ) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => Some(S3Config {
                endpoint,
                bucket,
                access_key,
                secret_key,
                region: var("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
            }),
            _ => None,
        };

        let local_offset = match var("LOCAL_UTC_OFFSET") {
            Some(v) => Some(parse_offset(&v).with_context(|| format!("LOCAL_UTC_OFFSET {:?} is not +HH:MM", v))?),
            None => None,
        };

        // the rollover poll must run at least once a minute
        let rollover_secs = num("ROLLOVER_CHECK_SECS", 60)?.clamp(1, 60);

        let retention_days = match var("RETENTION_DAYS") {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .context("RETENTION_DAYS must be a whole number")?,
            None => d.retention_days,
        };
        ensure!(
            (1..=MAX_RETENTION_DAYS).contains(&retention_days),
            "RETENTION_DAYS must be between 1 and {}",
            MAX_RETENTION_DAYS
        );

        let host = match var("APP_HOST") {
            Some(v) => v
                .trim()
                .parse::<IpAddr>()
                .with_context(|| format!("APP_HOST {:?} is not an IP address", v))?,
            None => d.host,
        };
        let port = match var("APP_PORT") {
            Some(v) => v.trim().parse::<u16>().context("APP_PORT must be a port number")?,
            None => d.port,
        };

        Ok(Self {
            host,
            port,
            ledger_path: var("LEDGER_PATH").map(PathBuf::from).unwrap_or(d.ledger_path),
            widget_snapshot_path: var("WIDGET_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.widget_snapshot_path),
            image_dir: var("IMAGE_DIR").map(PathBuf::from).unwrap_or(d.image_dir),
            s3,
            inference_endpoint: var("INFERENCE_ENDPOINT").unwrap_or(d.inference_endpoint),
            inference_timeout: Duration::from_secs(num("INFERENCE_TIMEOUT_SECS", 30)?),
            widget_debounce: Duration::from_millis(num("WIDGET_DEBOUNCE_MS", 200)?),
            rollover_check: Duration::from_secs(rollover_secs),
            retention_days,
            local_offset,
            goals: Goals {
                calories: goal("GOAL_CALORIES", d.goals.calories)?,
                protein: goal("GOAL_PROTEIN", d.goals.protein)?,
                carbs: goal("GOAL_CARBS", d.goals.carbs)?,
                fat: goal("GOAL_FAT", d.goals.fat)?,
            },
        })
    }
}
