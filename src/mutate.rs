use rand::Rng;

/// Invisible code points that are safe to append without changing how the
/// text renders: zero-width space, zero-width non-joiner, zero-width
/// joiner, byte-order mark.
const INVISIBLE: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Produce a near-duplicate of `text` so distinct destinations receive
/// distinct payload bytes: 0-1 trailing space, then 1-2 invisible
/// characters, all drawn independently per call.
///
/// Characters are only ever appended, never inserted, so offset-based
/// formatting spans on the original text stay valid. Empty input stays
/// empty.
pub fn mutate(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(text.len() + 9);
    out.push_str(text);
    if rng.gen_bool(0.5) {
        out.push(' ');
    }
    for _ in 0..rng.gen_range(1..=2) {
        out.push(INVISIBLE[rng.gen_range(0..INVISIBLE.len())]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIALS: usize = 1000;

    #[test]
    fn test_empty_input_stays_empty() {
        assert_eq!(mutate(""), "");
    }

    #[test]
    fn test_output_starts_with_input() {
        // Must hold for every trial, not probabilistically.
        for input in ["hello", "héllo wörld", "a", "multi\nline ✨"] {
            for _ in 0..TRIALS {
                assert!(mutate(input).starts_with(input));
            }
        }
    }

    #[test]
    fn test_output_differs_from_nonempty_input() {
        for _ in 0..TRIALS {
            let out = mutate("same text");
            assert_ne!(out, "same text");
            assert!(out.len() > "same text".len());
        }
    }

    #[test]
    fn test_suffix_drawn_from_invisible_pool() {
        for _ in 0..TRIALS {
            let out = mutate("base");
            let suffix: Vec<char> = out["base".len()..].chars().collect();
            assert!(!suffix.is_empty() && suffix.len() <= 3);
            let spaces = suffix.iter().filter(|c| **c == ' ').count();
            assert!(spaces <= 1);
            for c in suffix {
                assert!(c == ' ' || INVISIBLE.contains(&c), "unexpected char {c:?}");
            }
        }
    }

    #[test]
    fn test_independent_draws_rarely_collide() {
        let collisions = (0..TRIALS)
            .filter(|_| mutate("payload") == mutate("payload"))
            .count();
        // 2 space choices x 20 suffix combinations puts the expected
        // collision rate around 2.5%.
        assert!(collisions < TRIALS / 20, "{collisions} collisions in {TRIALS}");
    }
}
