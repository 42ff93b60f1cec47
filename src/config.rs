//! Configuration surface (ambient component 4.K).
//!
//! Every option is read from an environment variable prefixed `UCG_`
//! at [`Config::from_env`], with [`Config::modify`] mirroring
//! `config_modify` for programmatic override. `spec.md` §6's table is
//! implemented exactly: `PLANC`, `LOG_LEVEL`, `USE_MT_MUTEX`,
//! `PLANC_PATH`, plus one `<COLL>_ATTR` string per public collective.

use std::collections::HashMap;
use std::env;
use tracing::debug;

const ENV_PREFIX: &str = "UCG_";

/// `spec.md` §6's public collectives, for `<COLL>_ATTR` keys.
pub const COLLECTIVES: [&str; 7] = ["BCAST", "ALLREDUCE", "BARRIER", "ALLTOALLV", "SCATTERV", "GATHERV", "ALLGATHERV"];

/// `USE_MT_MUTEX`: which lock a multi-threaded context uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockKind {
    Mutex,
    Spin,
}

/// The full resolved configuration table.
#[derive(Clone, Debug)]
pub struct Config {
    pub planc: String,
    pub log_level: String,
    pub use_mt_mutex: LockKind,
    pub planc_path: String,
    /// `<COLL>_ATTR` override strings, keyed by the names in
    /// [`COLLECTIVES`].
    pub coll_attr: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            planc: "all".to_string(),
            log_level: "warn".to_string(),
            use_mt_mutex: LockKind::Spin,
            planc_path: default_planc_path(),
            coll_attr: HashMap::new(),
            overrides: HashMap::new(),
        }
    }
}

fn default_planc_path() -> String {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ".".to_string())
}

impl Config {
    /// Read every option from `UCG_<OPTION>`, falling back to the
    /// documented defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = env::var(format!("{ENV_PREFIX}PLANC")) {
            cfg.planc = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            cfg.log_level = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}USE_MT_MUTEX")) {
            cfg.use_mt_mutex = if v.eq_ignore_ascii_case("y") { LockKind::Mutex } else { LockKind::Spin };
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}PLANC_PATH")) {
            cfg.planc_path = v;
        }
        for coll in COLLECTIVES {
            if let Ok(v) = env::var(format!("{ENV_PREFIX}{coll}_ATTR")) {
                cfg.coll_attr.insert(coll.to_string(), v);
            }
        }
        debug!(planc = %cfg.planc, log_level = %cfg.log_level, "effective configuration");
        cfg
    }

    /// `config_modify(name, value)`: programmatic override of a single
    /// named option, taking precedence over whatever was read from the
    /// environment.
    pub fn modify(&mut self, name: &str, value: &str) {
        match name {
            "PLANC" => self.planc = value.to_string(),
            "LOG_LEVEL" => self.log_level = value.to_string(),
            "USE_MT_MUTEX" => self.use_mt_mutex = if value.eq_ignore_ascii_case("y") { LockKind::Mutex } else { LockKind::Spin },
            "PLANC_PATH" => self.planc_path = value.to_string(),
            other if other.ends_with("_ATTR") => {
                let coll = other.trim_end_matches("_ATTR").to_string();
                self.coll_attr.insert(coll, value.to_string());
            }
            other => {
                self.overrides.insert(other.to_string(), value.to_string());
            }
        }
        debug!(name, value, "config_modify");
    }

    /// `config_read`: look up a named option's current effective
    /// value, including ad hoc keys set via [`Self::modify`].
    #[must_use]
    pub fn read(&self, name: &str) -> Option<String> {
        match name {
            "PLANC" => Some(self.planc.clone()),
            "LOG_LEVEL" => Some(self.log_level.clone()),
            "USE_MT_MUTEX" => Some(match self.use_mt_mutex {
                LockKind::Mutex => "y".to_string(),
                LockKind::Spin => "n".to_string(),
            }),
            "PLANC_PATH" => Some(self.planc_path.clone()),
            other if other.ends_with("_ATTR") => self.coll_attr.get(other.trim_end_matches("_ATTR")).cloned(),
            other => self.overrides.get(other).cloned(),
        }
    }

    /// `config_release`. A no-op beyond dropping `self` in Rust; kept
    /// as an explicit call so code ported from the C lifecycle has an
    /// equivalent call site.
    pub fn release(self) {
        drop(self);
    }

    /// List of plugin names selected by `PLANC` for this process, with
    /// `all` expanded against the registry's known names.
    #[must_use]
    pub fn selected_plugins(&self, known: &[&str]) -> Vec<String> {
        if self.planc.eq_ignore_ascii_case("all") {
            known.iter().map(|s| (*s).to_string()).collect()
        } else {
            self.planc.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.planc, "all");
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.use_mt_mutex, LockKind::Spin);
    }

    #[test]
    fn modify_overrides_coll_attr() {
        let mut cfg = Config::default();
        cfg.modify("BCAST_ATTR", "I:1 S:10");
        assert_eq!(cfg.read("BCAST_ATTR").as_deref(), Some("I:1 S:10"));
    }

    #[test]
    fn selected_plugins_expands_all() {
        let cfg = Config::default();
        assert_eq!(cfg.selected_plugins(&["ucx"]), vec!["ucx".to_string()]);
    }

    #[test]
    fn selected_plugins_splits_comma_list() {
        let mut cfg = Config::default();
        cfg.modify("PLANC", "ucx, hccl");
        assert_eq!(cfg.selected_plugins(&["ucx", "hccl"]), vec!["ucx".to_string(), "hccl".to_string()]);
    }
}
