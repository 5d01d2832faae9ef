use crate::population::Population;

/// `info!` for lines carrying ANSI colors; the escape codes are stripped when
/// colors are disabled (e.g. when logging to a file)
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {
        if $colorful {
            log::info!($($arg)*);
        } else {
            log::info!("{}", $crate::utils::strip_ansi(&format!($($arg)*)));
        }
    };
}

/// Removes `ESC[...m` color sequences
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// One summary line per generation
pub fn display_generation(pop: &Population, generation: usize, evaluated: usize) -> String {
    match pop.best() {
        Some(best) => {
            let mean = pop.genotypes.iter().map(|g| g.fit).sum::<f64>() / pop.len() as f64;
            format!(
                "#{:<4} | \x1b[1;92mbest {:.4}\x1b[0m | mean {:.4} | age {} | {} new evaluations | {}",
                generation,
                best.fit,
                mean,
                generation.saturating_sub(best.epoch) + 1,
                evaluated,
                best.phenotype()
            )
        }
        None => format!("#{:<4} | empty population", generation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;93mFold #1\x1b[0m done"), "Fold #1 done");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_display_generation() {
        let pop = Population::test().sort();
        let line = strip_ansi(&display_generation(&pop, 12, 3));
        assert!(line.contains("best 0.7500"));
        assert!(line.contains("3 new evaluations"));
        assert!(display_generation(&Population::new(), 0, 0).contains("empty"));
    }
}
