//! HandBrake progress parsing.
//!
//! HandBrake reports progress as
//! `Encoding: task 1 of 1, 1.63 % (60.56 fps, avg 83.01 fps, ETA 00h22m29s)`.
//! Every output line is logged at debug level; progress is logged at info
//! level once per 10 % step.

/// One parsed progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    pub percent: f32,
    /// `00h22m29s`, when HandBrake has an estimate
    pub eta: Option<String>,
}

/// Parse a HandBrake progress line.
///
/// Returns `None` for any other output.
pub fn parse_progress(line: &str) -> Option<EncodeProgress> {
    let rest = line.trim().strip_prefix("Encoding: task")?;
    let (_, after_task) = rest.split_once(',')?;
    let (percent_str, tail) = after_task.split_once('%')?;
    let percent: f32 = percent_str.trim().parse().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }

    let eta = tail.split_once("ETA ").and_then(|(_, eta)| {
        let eta = eta.trim_end_matches(')').trim();
        (!eta.is_empty()).then(|| eta.to_string())
    });

    Some(EncodeProgress { percent, eta })
}

/// Logs encoder output for one process. Not shared between processes.
#[derive(Debug)]
pub struct ProgressLogger {
    label: String,
    next_step: u32,
}

impl ProgressLogger {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_step: 0,
        }
    }

    /// Log `line`. Returns the progress if this line crossed a new 10 % step.
    pub fn accept(&mut self, line: &str) -> Option<EncodeProgress> {
        tracing::debug!("[{}] {}", self.label, line);

        let progress = parse_progress(line)?;
        if self.next_step > 100 || (progress.percent as u32) < self.next_step {
            return None;
        }

        self.next_step = (progress.percent as u32 / 10 + 1) * 10;
        match &progress.eta {
            Some(eta) => tracing::info!(
                "[{}] {:.2} % (ETA {})",
                self.label,
                progress.percent,
                eta
            ),
            None => tracing::info!("[{}] {:.2} %", self.label, progress.percent),
        }
        Some(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full_progress_line() {
        let progress =
            parse_progress("Encoding: task 1 of 1, 1.63 % (60.56 fps, avg 83.01 fps, ETA 00h22m29s)")
                .unwrap();
        assert!((progress.percent - 1.63).abs() < 0.001);
        assert_eq!(progress.eta.as_deref(), Some("00h22m29s"));
    }

    #[test]
    fn test_parse_progress_without_eta() {
        let progress = parse_progress("Encoding: task 1 of 1, 0.50 %").unwrap();
        assert!((progress.percent - 0.5).abs() < 0.001);
        assert_eq!(progress.eta, None);
    }

    #[test]
    fn test_parse_ignores_other_output() {
        assert_eq!(parse_progress("[12:00:00] libhb: scan thread found 1 valid title(s)"), None);
        assert_eq!(parse_progress("Encoding: task 1 of 1, abc %"), None);
        assert_eq!(parse_progress("Encoding: task 1 of 1, 250.00 %"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[test]
    fn test_logger_reports_each_step_once() {
        let mut logger = ProgressLogger::new("clip.mp4");
        let percents = [0.1, 3.0, 9.99, 10.2, 10.9, 15.0, 31.0, 32.0, 99.5, 100.0, 100.0];

        let reported: Vec<u32> = percents
            .iter()
            .filter_map(|p| {
                logger.accept(&format!(
                    "Encoding: task 1 of 1, {:.2} % (1.00 fps, avg 1.00 fps, ETA 00h00m01s)",
                    p
                ))
            })
            .map(|progress| progress.percent as u32)
            .collect();

        assert_eq!(reported, vec![0, 10, 31, 99, 100]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_logger_reports_at_most_eleven_steps(
            mut percents in prop::collection::vec(0.0f32..=100.0, 0..200),
        ) {
            percents.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mut logger = ProgressLogger::new("clip");

            let mut last_step = None;
            let mut reported = 0;
            for p in percents {
                if let Some(progress) = logger.accept(&format!("Encoding: task 1 of 1, {:.2} %", p)) {
                    let step = progress.percent as u32 / 10;
                    prop_assert!(last_step.map_or(true, |last| step > last));
                    last_step = Some(step);
                    reported += 1;
                }
            }
            prop_assert!(reported <= 11);
        }
    }
}
