//! `${NAME}` expansion in raw config text, applied before parsing.

/// Expand placeholders from the process environment. Unknown names stay
/// verbatim so the parser or validator can report them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(len) = after.find('}') else {
            // Unterminated: keep the tail as written.
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..len];
        match lookup(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + len + 1]),
        }
        rest = &after[len + 1..];
    }
    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn transit_env(name: &str) -> Option<String> {
        match name {
            "TRANSIT_ADDR" => Some("https://transit.internal:8200".to_string()),
            "TRANSIT_TOKEN" => Some("s.abc".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_every_known_name() {
        assert_eq!(
            substitute_env_with("url = \"${TRANSIT_ADDR}\"\ntoken = \"${TRANSIT_TOKEN}\"", transit_env),
            "url = \"https://transit.internal:8200\"\ntoken = \"s.abc\""
        );
    }

    #[test]
    fn unknown_and_empty_names_are_kept() {
        assert_eq!(substitute_env_with("${SHREDDER_UNSET}/${}", transit_env), "${SHREDDER_UNSET}/${}");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a${TRANSIT_ADDR", transit_env), "a${TRANSIT_ADDR");
        assert_eq!(substitute_env("cost $5"), "cost $5");
    }
}
