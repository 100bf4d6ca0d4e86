//! Advisory query-string scan. Matches are logged, never enforced.

const DENYLIST: &[&str] = &[
    "<script",
    "%3cscript",
    "javascript:",
    "onerror=",
    "union select",
    "drop table",
    "../",
    "exec(",
    "eval(",
];

/// Denylisted patterns found in `query`, case-insensitively, in denylist order.
/// Both the raw and the form-decoded query are searched.
pub fn scan(query: &str) -> Vec<&'static str> {
    if query.is_empty() {
        return Vec::new();
    }
    let haystack = format!("{}\n{}", query, decode(query)).to_lowercase();
    DENYLIST
        .iter()
        .filter(|pattern| haystack.contains(*pattern))
        .copied()
        .collect()
}

/// `key=value` pairs with percent escapes resolved and `+` read as a space.
fn decode(query: &str) -> String {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&"),
        Err(_) => query.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_is_case_insensitive() {
        assert_eq!(scan("q=1; DROP TABLE users"), vec!["drop table"]);
        assert_eq!(scan("x=<ScRiPt>alert(1)"), vec!["<script"]);
    }

    #[test]
    fn test_scan_reports_every_match() {
        let matches = scan("a=../../etc&b=1 union select *");
        assert_eq!(matches, vec!["union select", "../"]);
    }

    #[test]
    fn test_scan_sees_through_url_encoding() {
        assert_eq!(scan("q=drop%20table%20users"), vec!["drop table"]);
        assert_eq!(scan("q=1+UNION+SELECT+password"), vec!["union select"]);
        assert_eq!(scan("next=%2E%2E%2Fetc"), vec!["../"]);
        assert_eq!(scan("x=%253Cscript%253E"), vec!["%3cscript"]);
    }

    #[test]
    fn test_clean_query() {
        assert!(scan("page=2&sort=created_at").is_empty());
        assert!(scan("q=table+drop").is_empty());
        assert!(scan("").is_empty());
    }
}
