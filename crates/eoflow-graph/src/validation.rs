// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Argument validation against process declarations.

use serde_json::{Map, Value};

use crate::error::{GraphValidationError, Result};
use crate::registry::{RegisteredProcess, json_type_name};

/// Validate a node's arguments against its process declaration.
///
/// Checks, in declaration order: required arguments are present, present
/// arguments have the declared type, and string arguments match the declared
/// pattern. The first violation is returned. Undeclared arguments are kept as
/// opaque values and not checked.
pub fn validate_arguments(
    path: &str,
    process: &RegisteredProcess,
    args: &Map<String, Value>,
) -> Result<()> {
    for (name, param) in &process.spec().parameters {
        let Some(value) = args.get(name) else {
            if param.required {
                return Err(GraphValidationError::MissingArgument {
                    path: path.to_string(),
                    process_id: process.process_id().to_string(),
                    argument: name.clone(),
                });
            }
            continue;
        };

        if !param.value_type.matches(value) {
            return Err(GraphValidationError::InvalidArgumentType {
                path: path.to_string(),
                process_id: process.process_id().to_string(),
                argument: name.clone(),
                expected: param.value_type,
                actual: json_type_name(value),
            });
        }

        if let (Some(regex), Some(text)) = (process.pattern(name), value.as_str())
            && !regex.is_match(text)
        {
            return Err(GraphValidationError::PatternMismatch {
                path: path.to_string(),
                process_id: process.process_id().to_string(),
                argument: name.clone(),
                pattern: regex.as_str().to_string(),
            });
        }
    }

    Ok(())
}

/// Closest known id to an unknown process or product id.
///
/// Ids are compared ignoring case and the `-`/`_` spelling. A candidate is
/// only suggested within an edit distance of a third of the unknown id's
/// length (at least 2). Ties go to the lexically smaller id.
pub fn suggest_id<'a>(unknown: &str, known: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let unknown_key = id_key(unknown);
    let limit = (unknown_key.len() / 3).max(2);

    known
        .into_iter()
        .map(|id| (edit_distance(&unknown_key, &id_key(id)), id))
        .filter(|(distance, _)| *distance <= limit)
        .min()
        .map(|(_, id)| id.to_string())
}

fn id_key(id: &str) -> Vec<char> {
    id.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Insertions, deletions and substitutions turning `from` into `to`.
fn edit_distance(from: &[char], to: &[char]) -> usize {
    // row[j]: distance between the consumed prefix of `from` and to[..j].
    let mut row: Vec<usize> = (0..=to.len()).collect();

    for (i, a) in from.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, b) in to.iter().enumerate() {
            let substitute = diagonal + usize::from(a != b);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
        }
    }

    row[to.len()]
}
