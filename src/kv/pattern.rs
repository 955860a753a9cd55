//! Glob matching with the semantics of the store's MATCH option.
//!
//! Supports `*`, `?`, `[...]` classes (with `^` negation and ranges) and `\`
//! escapes, which covers every pattern the engine generates.

/// Returns true if `key` matches the glob `pattern`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    match_from(&p, &k)
}

fn match_from(p: &[char], k: &[char]) -> bool {
    let (mut pi, mut ki) = (0, 0);
    // Backtrack point for the most recent `*`
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, k[ki]) {
                        if matched {
                            pi = next;
                            ki += 1;
                            continue;
                        }
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == k[ki] {
                        pi += 2;
                        ki += 1;
                        continue;
                    }
                }
                c if c == k[ki] => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, sk)) => {
                pi = sp + 1;
                ki = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Matches `c` against the class starting at `p[start] == '['`.
/// Returns (matched, index after the closing bracket), or None if unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }
    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_star() {
        assert!(glob_match("cache:user:*", "cache:user:42"));
        assert!(glob_match("cache:user:*", "cache:user:"));
        assert!(!glob_match("cache:user:*", "cache:pickup:42"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("events:*:log", "events:ip:10.0.0.1:log"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("k?y", "key"));
        assert!(!glob_match("k?y", "kery"));
    }

    #[test]
    fn test_classes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("id:[0-9]", "id:7"));
        assert!(!glob_match("id:[0-9]", "id:x"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match(r"literal\*", "literal*"));
        assert!(!glob_match(r"literal\*", "literalX"));
    }

    #[test]
    fn test_variant_pattern_does_not_cross_identifiers() {
        assert!(glob_match("cache:user:12:*", "cache:user:12:ab12cd34ef56ab78"));
        assert!(!glob_match("cache:user:12:*", "cache:user:123"));
        assert!(!glob_match("cache:user:12:*", "cache:user:123:ab12cd34ef56ab78"));
    }
}
