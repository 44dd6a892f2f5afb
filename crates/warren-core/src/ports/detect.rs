//! Best-effort discovery of ports a project's own tooling expects.
//!
//! `package.json` scripts are searched for `--port N`; `.env`, `.env.local`
//! and the common bundler configs for `PORT=N` / `PORT: N`. Hints are keyed
//! by script name, or `config-<n>` for config file matches in scan order.

use std::{collections::BTreeMap, io, path::Path};

use regex::Regex;

use crate::{Error, Result};

const CONFIG_FILES: [&str; 5] = [
    "next.config.js",
    "vite.config.js",
    "webpack.config.js",
    ".env",
    ".env.local",
];

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(format!("{}: {e}", path.display()))),
    }
}

pub fn detect_project_ports(project_path: &Path) -> Result<BTreeMap<String, u16>> {
    let script_port = Regex::new(r"--port[=\s]+(\d+)").map_err(|e| Error::parse(e.to_string()))?;
    let config_port =
        Regex::new(r"(?i)PORT[=:\s]+(\d+)").map_err(|e| Error::parse(e.to_string()))?;

    let mut hints = BTreeMap::new();

    if let Some(raw) = read_optional(&project_path.join("package.json"))? {
        let package: serde_json::Value = serde_json::from_str(&raw)?;
        let scripts = package
            .get("scripts")
            .and_then(serde_json::Value::as_object)
            .into_iter()
            .flatten();
        for (name, script) in scripts {
            let port = script
                .as_str()
                .and_then(|s| script_port.captures(s))
                .and_then(|c| c[1].parse::<u16>().ok());
            if let Some(port) = port {
                hints.insert(name.clone(), port);
            }
        }
    }

    let mut index = 0usize;
    for file in CONFIG_FILES {
        let Some(content) = read_optional(&project_path.join(file))? else {
            continue;
        };
        for captures in config_port.captures_iter(&content) {
            if let Ok(port) = captures[1].parse::<u16>() {
                if port != 0 {
                    hints.insert(format!("config-{index}"), port);
                    index += 1;
                }
            }
        }
    }

    Ok(hints)
}
