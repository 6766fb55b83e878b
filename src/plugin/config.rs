//! Plugin descriptor file parsing.
//!
//! `name,path,enabled,kind,config_path[,script_env_path]`, comma-separated,
//! `#` comments, blank lines skipped, at most 16 rows. Grounded on
//! `original_source/core/src/drivers/plugin_config.c`'s line scanner.

use crate::PluginError;
use std::path::{Path, PathBuf};

pub const MAX_DESCRIPTORS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Script,
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub kind: PluginKind,
    pub config_path: PathBuf,
    pub script_env_path: Option<PathBuf>,
}

fn trim_field(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '\r' || c == '\n')
}

/// Parse up to [`MAX_DESCRIPTORS`] descriptor rows from `path`.
pub fn load(path: &Path) -> Result<Vec<Descriptor>, PluginError> {
    let text = std::fs::read_to_string(path).map_err(|_| PluginError::MalformedDescriptor {
        line_no: 0,
        reason: format!("cannot read {}", path.display()),
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<Vec<Descriptor>, PluginError> {
    let mut out = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = trim_field(raw_line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(trim_field).collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(PluginError::MalformedDescriptor {
                line_no,
                reason: format!("expected 5 or 6 fields, found {}", fields.len()),
            });
        }
        let enabled = match fields[2] {
            "0" => false,
            "1" => true,
            other => {
                return Err(PluginError::MalformedDescriptor {
                    line_no,
                    reason: format!("enabled must be 0 or 1, found {other:?}"),
                })
            }
        };
        let kind = match fields[3] {
            "0" => PluginKind::Script,
            "1" => PluginKind::Native,
            other => {
                return Err(PluginError::MalformedDescriptor {
                    line_no,
                    reason: format!("kind must be 0 or 1, found {other:?}"),
                })
            }
        };
        out.push(Descriptor {
            name: fields[0].to_owned(),
            path: PathBuf::from(fields[1]),
            enabled,
            kind,
            config_path: PathBuf::from(fields[4]),
            script_env_path: fields.get(5).filter(|s| !s.is_empty()).map(PathBuf::from),
        });
        if out.len() > MAX_DESCRIPTORS {
            return Err(PluginError::TooManyDescriptors {
                max: MAX_DESCRIPTORS,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_descriptor_scenario() {
        let text = "\
# test
p_native,./x.so,1,1,./x.cfg
p_script,./y.py,1,0,./y.cfg,./venv
p_off,./z.so,0,1,./z.cfg
";
        let descriptors = parse(text).unwrap();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].name, "p_native");
        assert_eq!(descriptors[0].kind, PluginKind::Native);
        assert!(descriptors[0].enabled);
        assert_eq!(descriptors[1].kind, PluginKind::Script);
        assert_eq!(
            descriptors[1].script_env_path,
            Some(PathBuf::from("./venv"))
        );
        assert!(!descriptors[2].enabled);
    }

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let text = "\n  \n# comment\np,./p.so,1,1,./p.cfg\n";
        assert_eq!(parse(text).unwrap().len(), 1);
    }

    #[test]
    fn fields_are_trimmed_of_whitespace_and_crlf() {
        let text = "  p , ./p.so , 1 , 1 , ./p.cfg \r\n";
        let d = &parse(text).unwrap()[0];
        assert_eq!(d.name, "p");
        assert_eq!(d.path, PathBuf::from("./p.so"));
    }

    #[test]
    fn rejects_bad_enabled_field() {
        let text = "p,./p.so,maybe,1,./p.cfg\n";
        assert!(matches!(
            parse(text),
            Err(PluginError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn rejects_more_than_sixteen_descriptors() {
        let mut text = String::new();
        for i in 0..17 {
            text.push_str(&format!("p{i},./p.so,1,1,./p.cfg\n"));
        }
        assert!(matches!(
            parse(&text),
            Err(PluginError::TooManyDescriptors { max: 16 })
        ));
    }
}
