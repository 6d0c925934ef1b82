//! Decoding of `nix build --json` output.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::errors::BuilderError;

/// One build result record as printed by `nix build --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    #[serde(rename = "drvPath")]
    pub drv_path: String,
    pub outputs: HashMap<String, String>,
}

impl BuildOutput {
    /// Store path of the named output.
    pub fn path_for(&self, name: &str) -> Result<&str, BuilderError> {
        self.outputs
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| BuilderError::MissingOutput(name.to_string()))
    }
}

/// Decodes the accumulated stdout of a successful build. nix prints a JSON
/// array of result records; the first one describes the requested target.
pub fn parse(stdout: &str) -> Result<BuildOutput, BuilderError> {
    let results: Vec<BuildOutput> = serde_json::from_str(stdout.trim())
        .map_err(|e| BuilderError::MalformedOutput(e.to_string()))?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| BuilderError::MalformedOutput("empty result array".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"[{"drvPath":"/nix/store/x.drv","outputs":{"out":"/nix/store/abc"}}]"#;

    #[test]
    fn parses_a_well_formed_document() {
        let output = parse(GOOD).unwrap();
        assert_eq!(output.drv_path, "/nix/store/x.drv");
        assert_eq!(output.path_for("out").unwrap(), "/nix/store/abc");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert!(parse(&format!("\n{GOOD}\n")).is_ok());
    }

    #[test]
    fn rejects_non_json() {
        let err = parse("this is a nix trace, not json").unwrap_err();
        assert!(matches!(err, BuilderError::MalformedOutput(_)));
    }

    #[test]
    fn rejects_wrong_shape() {
        // outputs present but not a string map
        let err = parse(r#"[{"drvPath":"/x.drv","outputs":["out"]}]"#).unwrap_err();
        assert!(matches!(err, BuilderError::MalformedOutput(_)));
    }

    #[test]
    fn rejects_an_empty_result_array() {
        let err = parse("[]").unwrap_err();
        assert!(matches!(err, BuilderError::MalformedOutput(_)));
    }

    #[test]
    fn missing_named_output_is_its_own_failure() {
        let output = parse(GOOD).unwrap();
        let err = output.path_for("doc").unwrap_err();
        match err {
            BuilderError::MissingOutput(name) => assert_eq!(name, "doc"),
            other => panic!("expected MissingOutput, got {other:?}"),
        }
    }
}
