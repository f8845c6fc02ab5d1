//! Built-in monitors and the catalog that registers them

pub mod announcement;
pub mod connection;
pub mod disagreement;
pub mod invalid_coordinate;
pub mod log;
pub mod query;
pub mod race;
pub mod segfault;
pub mod spam;
pub mod uptime;
pub mod vpn;
pub mod world_thread;

use serde::de::DeserializeOwned;
use warden_core::{Result, WardenError};

use crate::monitor::{Monitor, MonitorCatalog, MonitorContext};

pub use announcement::AnnouncementMonitor;
pub use connection::ConnectionMonitor;
pub use disagreement::DisagreementMonitor;
pub use invalid_coordinate::InvalidCoordinateMonitor;
pub use log::LogMonitor;
pub use query::QueryMonitor;
pub use race::RaceMonitor;
pub use segfault::SegfaultMonitor;
pub use spam::{SpamMonitor, TallyBook};
pub use uptime::UptimeMonitor;
pub use vpn::VpnMonitor;
pub use world_thread::WorldThreadMonitor;

/// Catalog with every built-in monitor under its configuration key
pub fn standard_catalog() -> MonitorCatalog {
    MonitorCatalog::new()
        .register("connections", |ctx, _| Ok(boxed(ConnectionMonitor::new(ctx)?)))
        .register("spam", |ctx, table| {
            Ok(boxed(SpamMonitor::new(ctx, settings("spam", table)?)))
        })
        .register("race", |ctx, table| {
            Ok(boxed(RaceMonitor::new(ctx, settings("race", table)?)?))
        })
        .register("invalid_coordinate", |ctx, table| {
            Ok(boxed(InvalidCoordinateMonitor::new(
                ctx,
                settings("invalid_coordinate", table)?,
            )))
        })
        .register("segfault", |ctx, _| Ok(boxed(SegfaultMonitor::new(ctx))))
        .register("disagreement", |ctx, table| {
            Ok(boxed(DisagreementMonitor::new(ctx, settings("disagreement", table)?)))
        })
        .register("uptime", |ctx, table| {
            Ok(boxed(UptimeMonitor::new(ctx, settings("uptime", table)?)))
        })
        .register("log", |_, table| Ok(boxed(LogMonitor::new(settings("log", table)?))))
        .register("query", |ctx, table| {
            Ok(boxed(QueryMonitor::new(ctx, settings("query", table)?)))
        })
        .register("vpn", |ctx, table| {
            Ok(boxed(VpnMonitor::new(ctx, settings("vpn", table)?)?))
        })
        .register("announcement", |ctx, table| {
            Ok(boxed(AnnouncementMonitor::new(
                ctx,
                settings("announcement", table)?,
            )?))
        })
        .register("world_thread", |ctx, _| Ok(boxed(WorldThreadMonitor::new(ctx))))
}

fn boxed<M: Monitor>(monitor: M) -> Box<dyn Monitor> {
    Box::new(monitor)
}

/// Deserialize a monitor's settings table, filling in defaults
pub(crate) fn settings<T: DeserializeOwned>(key: &str, table: &toml::Table) -> Result<T> {
    toml::Value::Table(table.clone())
        .try_into()
        .map_err(|e| WardenError::Config(format!("Invalid settings for monitor '{}': {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorEntry, default_monitors};
    use crate::testing::Harness;

    #[test]
    fn test_standard_catalog_covers_defaults() {
        let catalog = standard_catalog();
        for entry in default_monitors() {
            assert!(catalog.contains(&entry.key), "missing {}", entry.key);
        }
        for key in ["query", "announcement"] {
            assert!(catalog.contains(key), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_default_pipeline_order() {
        let harness = Harness::new();
        let pipeline = standard_catalog()
            .build(&default_monitors(), &harness.ctx)
            .unwrap();
        assert_eq!(
            pipeline.names(),
            vec![
                "connections",
                "log",
                "uptime",
                "spam",
                "segfault",
                "world_thread",
                "invalid_coordinate",
                "race",
                "vpn",
                "disagreement"
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_settings_are_rejected() {
        let harness = Harness::new();
        let mut entry = MonitorEntry::new("spam");
        entry
            .settings
            .insert("threshold".to_string(), toml::Value::String("lots".to_string()));
        let result = standard_catalog().build(&[entry], &harness.ctx);
        assert!(matches!(result, Err(WardenError::Config(_))));
    }
}
