/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unknown variables and unterminated placeholders are emitted verbatim so
/// a typo surfaces in the parsed value instead of silently vanishing.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                // Empty or unterminated placeholder; keep the literal text.
                out.push_str("${");
                rest = after;
            },
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        // PATH is present in any test environment.
        let path = std::env::var("PATH").unwrap();
        assert_eq!(
            substitute_env("search_path = ${PATH}"),
            format!("search_path = {path}")
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${BEACON_NONEXISTENT_XYZ}"),
            "${BEACON_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn leaves_unterminated_placeholder() {
        assert_eq!(substitute_env("prefix ${OOPS"), "prefix ${OOPS");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
