//! Migration file name parser using nom.
//!
//! Migration scripts follow the versioned naming scheme:
//!
//! ```text
//! V2_1__add_item_prices.sql
//! ┬─┬─ ┬──────┬──────── ┬──
//! │ │  │      │         └── Extension (required)
//! │ │  │      └── Description (underscores become spaces)
//! │ │  └── Separator (double underscore)
//! │ └── Version segments, split by `.` or `_`
//! └── Versioned prefix
//! ```

use nom::{
    IResult,
    bytes::complete::tag,
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map_res, rest, verify},
    multi::separated_list1,
    sequence::{preceded, tuple},
};

use crate::error::{SchemaGenError, SchemaGenResult};

/// A parsed migration file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationName {
    pub segments: Vec<u64>,
    pub description: String,
}

/// Parse a version string such as `1`, `1.2` or `2_0_1` into numeric segments.
pub fn parse_version_segments(input: &str) -> SchemaGenResult<Vec<u64>> {
    let input = input.trim();
    let input = input.strip_prefix('V').unwrap_or(input);

    match all_consuming(version_segments)(input) {
        Ok((_, segments)) => Ok(segments),
        Err(e) => Err(SchemaGenError::Config(format!(
            "Invalid migration version '{}': {:?}",
            input, e
        ))),
    }
}

/// Parse a migration file name. Returns `None` for files that are not
/// versioned migrations (repeatable scripts, notes, editor backups).
pub fn parse_migration_file_name(file_name: &str) -> Option<MigrationName> {
    let stem = file_name.strip_suffix(".sql")?;

    match all_consuming(migration_stem)(stem) {
        Ok((_, (segments, description))) => Some(MigrationName {
            segments,
            description: description.replace('_', " ").trim().to_string(),
        }),
        Err(_) => None,
    }
}

/// Parse `V<version>__<description>`.
fn migration_stem(input: &str) -> IResult<&str, (Vec<u64>, &str)> {
    let (input, (segments, _, description)) = tuple((
        preceded(char('V'), version_segments),
        tag("__"),
        verify(rest, |d: &str| !d.trim().is_empty()),
    ))(input)?;

    Ok((input, (segments, description)))
}

/// Parse numeric segments separated by `.` or `_`.
fn version_segments(input: &str) -> IResult<&str, Vec<u64>> {
    separated_list1(one_of("._"), map_res(digit1, str::parse::<u64>))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_file_name() {
        let name = parse_migration_file_name("V1__create_users.sql").unwrap();
        assert_eq!(name.segments, vec![1]);
        assert_eq!(name.description, "create users");
    }

    #[test]
    fn test_parse_dotted_and_underscored_versions() {
        let dotted = parse_migration_file_name("V2.1__add_prices.sql").unwrap();
        assert_eq!(dotted.segments, vec![2, 1]);

        let underscored = parse_migration_file_name("V2_1_3__add_prices.sql").unwrap();
        assert_eq!(underscored.segments, vec![2, 1, 3]);
        assert_eq!(underscored.description, "add prices");
    }

    #[test]
    fn test_non_versioned_files_are_skipped() {
        assert_eq!(parse_migration_file_name("R__refresh_views.sql"), None);
        assert_eq!(parse_migration_file_name("V1__create_users.sql~"), None);
        assert_eq!(parse_migration_file_name("V1_create_users.sql"), None);
        assert_eq!(parse_migration_file_name("V1__.sql"), None);
        assert_eq!(parse_migration_file_name("README.md"), None);
    }

    #[test]
    fn test_parse_version_string() {
        assert_eq!(parse_version_segments("3").unwrap(), vec![3]);
        assert_eq!(parse_version_segments("V1.10").unwrap(), vec![1, 10]);
        assert!(parse_version_segments("1.x").is_err());
        assert!(parse_version_segments("").is_err());
    }
}
