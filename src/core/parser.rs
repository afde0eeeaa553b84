//! DH-002: Recipe loading and validation.
//!
//! Parses a recipe document and validates it before anything runs:
//! - A step containing `command` is a container command
//! - A step containing `postgres_user` is a Postgres backup
//! - Container names and users must be non-empty
//! - Backup archives must not exist yet, and their parent directory must
//!
//! Loading is all-or-nothing: every finding is collected and no recipe
//! is returned if there is any.

use super::error::{RecipeError, ValidationError};
use super::types::*;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Raw document shape before step classification.
#[derive(Debug, Deserialize)]
struct RecipeDocument {
    #[serde(default)]
    policy: Policy,
    recipe: Vec<serde_yaml_ng::Value>,
}

/// Read, parse, and validate a recipe file.
pub fn load_recipe(path: &Path) -> Result<Recipe, RecipeError> {
    load_recipe_with(path, &PolicyOverrides::default())
}

/// Like `load_recipe`, with policy overrides applied before validation.
pub fn load_recipe_with(path: &Path, overrides: &PolicyOverrides) -> Result<Recipe, RecipeError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RecipeError::io(format!("failed to read {}", path.display()), e))?;
    let mut recipe = parse_recipe(&content)?;
    overrides.apply(&mut recipe.policy);
    let errors = validate_recipe(&recipe);
    if errors.is_empty() {
        Ok(recipe)
    } else {
        Err(RecipeError::Validation(errors))
    }
}

/// Parse a recipe from a YAML string. Checks shape only, not the filesystem.
pub fn parse_recipe(yaml: &str) -> Result<Recipe, RecipeError> {
    let doc: RecipeDocument = serde_yaml_ng::from_str(yaml)
        .map_err(|e| RecipeError::validation(format!("YAML parse error: {}", e)))?;

    let mut steps = Vec::with_capacity(doc.recipe.len());
    let mut errors = Vec::new();

    for (i, value) in doc.recipe.into_iter().enumerate() {
        match classify_step(i + 1, value) {
            Ok(step) => steps.push(step),
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(RecipeError::Validation(errors));
    }

    Ok(Recipe {
        policy: doc.policy,
        steps,
    })
}

/// Pick the step kind from the keys present, then deserialize it.
fn classify_step(index: usize, value: serde_yaml_ng::Value) -> Result<Step, ValidationError> {
    let mapping = match value.as_mapping() {
        Some(m) => m,
        None => {
            return Err(ValidationError::new(format!(
                "step {}: expected a mapping",
                index
            )))
        }
    };

    // `command` wins when both keys are present.
    if mapping.contains_key("command") {
        serde_yaml_ng::from_value::<ContainerCommandStep>(value)
            .map(Step::ContainerCommand)
            .map_err(|e| ValidationError::new(format!("step {} (container command): {}", index, e)))
    } else if mapping.contains_key("postgres_user") {
        serde_yaml_ng::from_value::<PostgresBackupStep>(value)
            .map(Step::PostgresBackup)
            .map_err(|e| ValidationError::new(format!("step {} (postgres backup): {}", index, e)))
    } else {
        Err(ValidationError::new(format!(
            "step {}: matches no known step kind (expected `command` or `postgres_user`)",
            index
        )))
    }
}

/// Validate a parsed recipe. Returns a list of errors (empty = valid).
pub fn validate_recipe(recipe: &Recipe) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if recipe.policy.compression_level > 9 {
        errors.push(ValidationError::new(format!(
            "policy.compression_level must be 0-9, got {}",
            recipe.policy.compression_level
        )));
    }

    let mut archives = HashSet::new();

    for (i, step) in recipe.steps.iter().enumerate() {
        let index = i + 1;

        if step.container_name().trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "step {}: container_name must not be empty",
                index
            )));
        }

        if let Step::PostgresBackup(backup) = step {
            if backup.postgres_user.trim().is_empty() {
                errors.push(ValidationError::new(format!(
                    "step {}: postgres_user must not be empty",
                    index
                )));
            }
            validate_archive_path(index, backup, &recipe.policy, &mut errors);

            if !archives.insert(backup.output_archive.clone()) {
                errors.push(ValidationError::new(format!(
                    "step {}: output_archive {} is already the target of an earlier step",
                    index,
                    backup.output_archive.display()
                )));
            }
        }
    }

    errors
}

/// The archive must be a new file in an existing directory.
fn validate_archive_path(
    index: usize,
    backup: &PostgresBackupStep,
    policy: &Policy,
    errors: &mut Vec<ValidationError>,
) {
    let path = &backup.output_archive;

    if path.as_os_str().is_empty() {
        errors.push(ValidationError::new(format!(
            "step {}: output_archive must not be empty",
            index
        )));
        return;
    }

    // symlink_metadata so a dangling symlink still counts as existing
    if path.symlink_metadata().is_ok() {
        errors.push(ValidationError::new(format!(
            "step {}: output_archive {} already exists",
            index,
            path.display()
        )));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        errors.push(ValidationError::new(format!(
            "step {}: parent directory {} of output_archive does not exist",
            index,
            parent.display()
        )));
    }

    if policy.atomic_publish && backup.partial_path().symlink_metadata().is_ok() {
        errors.push(ValidationError::new(format!(
            "step {}: stale partial archive {} exists",
            index,
            backup.partial_path().display()
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(err: RecipeError) -> Vec<String> {
        err.findings().iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_dh002_parse_valid() {
        let yaml = r#"
recipe:
  - container_name: db1
    command: stop
  - container_name: db1
    postgres_user: admin
    output_archive: /out/db1.sql.gz
  - container_name: db1
    command: start
"#;
        let recipe = parse_recipe(yaml).unwrap();
        assert_eq!(recipe.steps.len(), 3);
        assert_eq!(recipe.policy, Policy::default());
        assert_eq!(
            recipe.steps[0],
            Step::ContainerCommand(ContainerCommandStep {
                container_name: "db1".to_string(),
                command: ContainerAction::Stop,
            })
        );
        match &recipe.steps[1] {
            Step::PostgresBackup(b) => {
                assert_eq!(b.postgres_user, "admin");
                assert_eq!(b.output_archive, Path::new("/out/db1.sql.gz"));
            }
            other => panic!("expected backup step, got {:?}", other),
        }
    }

    #[test]
    fn test_dh002_parse_policy() {
        let yaml = r#"
policy:
  stderr: log
  atomic_publish: false
  compression_level: 9
recipe: []
"#;
        let recipe = parse_recipe(yaml).unwrap();
        assert_eq!(recipe.policy.stderr, StderrCapture::Log);
        assert!(!recipe.policy.atomic_publish);
        assert_eq!(recipe.policy.compression_level, 9);
        assert!(recipe.steps.is_empty());
    }

    #[test]
    fn test_dh002_missing_recipe_key() {
        let err = parse_recipe("policy: {}\n").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("recipe"));
    }

    #[test]
    fn test_dh002_unknown_command() {
        let yaml = r#"
recipe:
  - container_name: db1
    command: restart
"#;
        let err = parse_recipe(yaml).unwrap_err();
        let msgs = messages(err);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].starts_with("step 1 (container command)"));
        assert!(msgs[0].contains("restart"));
    }

    #[test]
    fn test_dh002_missing_fields() {
        let yaml = r#"
recipe:
  - command: start
  - container_name: db1
    postgres_user: admin
"#;
        let msgs = messages(parse_recipe(yaml).unwrap_err());
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("container_name"));
        assert!(msgs[1].contains("output_archive"));
    }

    #[test]
    fn test_dh002_unknown_shape() {
        let yaml = r#"
recipe:
  - container_name: db1
    command: start
  - container_name: db1
    mysql_user: root
  - just a string
"#;
        let msgs = messages(parse_recipe(yaml).unwrap_err());
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("step 2: matches no known step kind"));
        assert!(msgs[1].contains("step 3: expected a mapping"));
    }

    #[test]
    fn test_dh002_command_wins_over_backup_keys() {
        let yaml = r#"
recipe:
  - container_name: db1
    command: start
    postgres_user: admin
"#;
        let recipe = parse_recipe(yaml).unwrap();
        assert_eq!(recipe.steps[0].kind(), "container_command");
    }

    #[test]
    fn test_dh002_extra_keys_ignored() {
        let yaml = r#"
recipe:
  - container_name: db1
    command: stop
    note: maintenance window
"#;
        assert!(parse_recipe(yaml).is_ok());
    }

    #[test]
    fn test_dh002_existing_archive_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("db1.sql.gz");
        std::fs::write(&existing, b"old").unwrap();

        let recipe_path = dir.path().join("recipe.yaml");
        std::fs::write(
            &recipe_path,
            format!(
                "recipe:\n  - container_name: db1\n    postgres_user: admin\n    output_archive: {}\n",
                existing.display()
            ),
        )
        .unwrap();

        let err = load_recipe(&recipe_path).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(messages(err)[0].contains("already exists"));
        // Untouched
        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn test_dh002_missing_parent_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe {
            policy: Policy::default(),
            steps: vec![Step::PostgresBackup(PostgresBackupStep {
                container_name: "db1".to_string(),
                postgres_user: "admin".to_string(),
                output_archive: dir.path().join("nope/db1.sql.gz"),
            })],
        };
        let errors = validate_recipe(&recipe);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("parent directory"));
    }

    #[test]
    fn test_dh002_duplicate_archive_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("db.sql.gz");
        let step = |name: &str| {
            Step::PostgresBackup(PostgresBackupStep {
                container_name: name.to_string(),
                postgres_user: "admin".to_string(),
                output_archive: archive.clone(),
            })
        };
        let recipe = Recipe {
            policy: Policy::default(),
            steps: vec![step("db1"), step("db2")],
        };
        let errors = validate_recipe(&recipe);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("step 2"));
        assert!(errors[0].message.contains("earlier step"));
    }

    #[test]
    fn test_dh002_stale_partial_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("db.sql.gz");
        std::fs::write(partial_path(&archive), b"half").unwrap();
        let mut recipe = Recipe {
            policy: Policy::default(),
            steps: vec![Step::PostgresBackup(PostgresBackupStep {
                container_name: "db1".to_string(),
                postgres_user: "admin".to_string(),
                output_archive: archive,
            })],
        };
        assert_eq!(validate_recipe(&recipe).len(), 1);

        recipe.policy.atomic_publish = false;
        assert!(validate_recipe(&recipe).is_empty());
    }

    #[test]
    fn test_dh002_empty_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe {
            policy: Policy::default(),
            steps: vec![
                Step::ContainerCommand(ContainerCommandStep {
                    container_name: "".to_string(),
                    command: ContainerAction::Start,
                }),
                Step::PostgresBackup(PostgresBackupStep {
                    container_name: "db1".to_string(),
                    postgres_user: "  ".to_string(),
                    output_archive: dir.path().join("a.sql.gz"),
                }),
            ],
        };
        let errors = validate_recipe(&recipe);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("container_name"));
        assert!(errors[1].message.contains("postgres_user"));
    }

    #[test]
    fn test_dh002_compression_level_bounds() {
        let mut recipe = parse_recipe("recipe: []\n").unwrap();
        recipe.policy.compression_level = 10;
        let errors = validate_recipe(&recipe);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("compression_level"));
    }

    #[test]
    fn test_dh002_override_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("db.sql.gz");
        std::fs::write(partial_path(&archive), b"half").unwrap();
        let recipe_path = dir.path().join("recipe.yaml");
        std::fs::write(
            &recipe_path,
            format!(
                "recipe:\n  - container_name: db1\n    postgres_user: admin\n    output_archive: {}\n",
                archive.display()
            ),
        )
        .unwrap();

        assert!(load_recipe(&recipe_path).is_err());
        let overrides = PolicyOverrides {
            stderr: Some(StderrCapture::Log),
            atomic_publish: Some(false),
        };
        let recipe = load_recipe_with(&recipe_path, &overrides).unwrap();
        assert!(!recipe.policy.atomic_publish);
        assert_eq!(recipe.policy.stderr, StderrCapture::Log);
    }

    #[test]
    fn test_dh002_load_missing_file() {
        let err = load_recipe(Path::new("/nonexistent/dockhand.yaml")).unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
