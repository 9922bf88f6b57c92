//! Command-line flags. Anything given here overrides the loaded configuration.

use std::path::{Path, PathBuf};

use hostaudit_core::{AuditConfig, ConfigError, Format};

pub const USAGE: &str = "\
hostaudit: inspect this host and publish an HTML/JSON report

Usage: hostaudit [OPTIONS]

  --config <path>        Configuration file (default: $HOSTAUDIT_CONFIG or config/hostaudit.toml)
  --probes a,b,c         Run only the named probes
  --format html,json     Output formats
  --no-obfuscate         Publish raw identity fields
  --list-probes          Print the built-in probes and exit
  --init-config <path>   Write the effective configuration as TOML and exit
  --help                 Show this message";

#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub probes: Option<Vec<String>>,
    pub formats: Option<Vec<Format>>,
    pub no_obfuscate: bool,
    pub list_probes: bool,
    pub init_config: Option<PathBuf>,
    pub help: bool,
}

impl CliArgs {
    /// Parse arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| format!("{} requires a value", name))
            };
            match flag.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--probes" => parsed.probes = Some(split_list(&value("--probes")?)),
                "--format" => {
                    let formats = split_list(&value("--format")?)
                        .iter()
                        .map(|f| f.parse::<Format>().map_err(|e| e.to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    parsed.formats = Some(formats);
                }
                "--init-config" => parsed.init_config = Some(PathBuf::from(value("--init-config")?)),
                "--no-obfuscate" => parsed.no_obfuscate = true,
                "--list-probes" => parsed.list_probes = true,
                "--help" | "-h" => parsed.help = true,
                other => return Err(format!("unknown argument `{}`", other)),
            }
        }
        Ok(parsed)
    }

    pub fn apply(&self, config: &mut AuditConfig) {
        if let Some(probes) = &self.probes {
            config.probes = Some(probes.clone());
        }
        if let Some(formats) = &self.formats {
            config.formats = formats.clone();
        }
        if self.no_obfuscate {
            config.obfuscate = false;
        }
    }

    /// Write `config` to the `--init-config` path, if one was given.
    pub fn write_init_config(&self, config: &AuditConfig) -> Result<Option<&Path>, ConfigError> {
        match &self.init_config {
            Some(path) => config.save_to_path(path).map(|()| Some(path.as_path())),
            None => Ok(None),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        CliArgs::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags_and_lists() {
        let args = parse(&["--config", "audit.toml", "--probes", "host_info, security", "--format=json", "--no-obfuscate"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("audit.toml")));
        assert_eq!(args.probes, Some(vec!["host_info".to_string(), "security".to_string()]));
        assert_eq!(args.formats, Some(vec![Format::Json]));
        assert!(args.no_obfuscate);
        assert!(!args.list_probes);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--probes"]).is_err());
        assert!(parse(&["--format", "pdf"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }

    #[test]
    fn overrides_config() {
        let mut config = AuditConfig::default();
        parse(&["--probes", "apps", "--format", "html", "--no-obfuscate"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.probes, Some(vec!["apps".to_string()]));
        assert_eq!(config.formats, vec![Format::Html]);
        assert!(!config.obfuscate);

        let mut untouched = AuditConfig::default();
        parse(&[]).unwrap().apply(&mut untouched);
        assert_eq!(untouched, AuditConfig::default());
    }

    #[test]
    fn init_config_round_trips_through_the_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/hostaudit.toml");
        let args = parse(&[
            "--init-config",
            path.to_str().unwrap(),
            "--format",
            "json",
            "--no-obfuscate",
            "--probes",
            "docker,security",
        ])
        .unwrap();

        let mut config = AuditConfig::default();
        args.apply(&mut config);
        assert_eq!(args.write_init_config(&config).unwrap(), Some(path.as_path()));

        let loaded = AuditConfig::load_from(&path).unwrap();
        assert_eq!(loaded.formats, vec![Format::Json]);
        assert!(!loaded.obfuscate);
        assert_eq!(loaded.probes, Some(vec!["docker".to_string(), "security".to_string()]));
        assert_eq!(loaded, config);

        assert_eq!(parse(&[]).unwrap().write_init_config(&config).unwrap(), None);
    }
}
