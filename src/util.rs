use std::path::Path;

/// Sanitize one branch-name component: uppercase, keep only `[A-Z0-9 ]`,
/// collapse whitespace runs to a single `_`, trim leading/trailing `_`.
/// Deterministic so client previews and the server derive the same name.
pub fn sanitize_branch_component(raw: &str) -> String {
    let upper: String = raw
        .to_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    upper
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string()
}

/// Derive the healing branch name from team and leader names.
pub fn healing_branch_name(team: &str, leader: &str) -> String {
    format!(
        "{}_{}_AI_Fix",
        sanitize_branch_component(team),
        sanitize_branch_component(leader)
    )
}

/// Translate a Windows-style path into the POSIX form a container expects.
/// `C:\repo\src\app.js` becomes `/c/repo/src/app.js`; forward-slash paths
/// pass through unchanged.
pub fn to_posix_path(path: &str) -> String {
    let mut out = path.replace('\\', "/");
    if out.len() >= 2 && out.as_bytes()[1] == b':' && out.as_bytes()[0].is_ascii_alphabetic() {
        let drive = out.as_bytes()[0].to_ascii_lowercase() as char;
        out = format!("/{}{}", drive, &out[2..]);
    }
    out
}

/// Extract `owner/repo` from the URL shapes the forge hands us.
pub fn parse_forge_repo_url(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/').trim_end_matches(".git");

    if let Some(pos) = url.find("github.com/") {
        let rest = &url[pos + "github.com/".len()..];
        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
    }
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        if parts.len() >= 2 {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
    }
    None
}

/// Truncate a string with an ellipsis.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Shorten a commit sha for display.
pub fn short_sha(sha: &str) -> &str {
    if sha.len() >= 7 { &sha[..7] } else { sha }
}

/// Lowercased file extension, if any.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_uppercases_and_collapses() {
        assert_eq!(sanitize_branch_component("Team Rocket"), "TEAM_ROCKET");
        assert_eq!(sanitize_branch_component("  ada   lovelace "), "ADA_LOVELACE");
        assert_eq!(sanitize_branch_component("dev-ops#1!"), "DEV_OPS_1");
        assert_eq!(sanitize_branch_component("___"), "");
    }

    #[test]
    fn branch_name_is_deterministic() {
        assert_eq!(
            healing_branch_name("Team Rocket", "Jessie J."),
            "TEAM_ROCKET_JESSIE_J_AI_Fix"
        );
        assert_eq!(healing_branch_name("a", "b"), "A_B_AI_Fix");
    }

    #[test]
    fn windows_paths_become_posix() {
        assert_eq!(to_posix_path(r"C:\repo\src\app.js"), "/c/repo/src/app.js");
        assert_eq!(to_posix_path("src/app.js"), "src/app.js");
        assert_eq!(to_posix_path(r"D:\x"), "/d/x");
    }

    #[test]
    fn repo_url_parsing() {
        assert_eq!(
            parse_forge_repo_url("https://github.com/octo/demo"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(
            parse_forge_repo_url("https://github.com/octo/demo.git/"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(
            parse_forge_repo_url("git@github.com:octo/demo.git"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(parse_forge_repo_url("https://gitlab.com/octo/demo"), None);
    }

    #[test]
    fn truncation_and_sha() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("abcdefghij", 8), "abcde...");
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }
}
