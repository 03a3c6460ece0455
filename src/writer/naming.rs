//! File and symbol names derived from an operation phrase

pub use crate::synthesis::prompt::function_name_for as variable_name_for;

/// Kebab-case file stem: `"Get Albums By Artist!"` -> `get-albums-by-artist`
pub fn file_stem_for(phrase: &str) -> String {
    let stem = phrase
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    if stem.is_empty() {
        "operation".to_string()
    } else {
        stem
    }
}

/// True for a plain JavaScript identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem_for("get albums by artist"), "get-albums-by-artist");
        assert_eq!(file_stem_for("  Increment artist popularity by 10!"), "increment-artist-popularity-by-10");
        assert_eq!(file_stem_for("../../etc/passwd"), "etc-passwd");
        assert_eq!(file_stem_for("???"), "operation");
    }

    #[test]
    fn test_variable_name() {
        assert_eq!(variable_name_for("get albums by artist"), "getAlbumsByArtist");
        assert!(is_identifier(&variable_name_for("10 newest albums")));
        assert!(!is_identifier("get-albums"));
    }
}
