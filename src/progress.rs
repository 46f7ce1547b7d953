/// Receives `(percent, label)` updates during an analysis run.
///
/// Passed explicitly into each run instead of being stored on the backend, so a
/// single backend can serve concurrent runs. Percentages reported to one sink
/// are non-decreasing.
pub trait ProgressSink {
    fn report(&mut self, percent: u8, label: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(u8, &str),
{
    fn report(&mut self, percent: u8, label: &str) {
        self(percent, label)
    }
}

/// Discards every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u8, _label: &str) {}
}

/// Maps 0-100 updates from an inner stage onto a sub-range of the outer sink.
pub struct ScaledProgress<'a> {
    inner: &'a mut dyn ProgressSink,
    start: u8,
    end: u8,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink, start: u8, end: u8) -> Self {
        Self {
            inner,
            start: start.min(100),
            end: end.clamp(start.min(100), 100),
        }
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn report(&mut self, percent: u8, label: &str) {
        let span = (self.end - self.start) as u32;
        let scaled = self.start as u32 + span * percent.min(100) as u32 / 100;
        self.inner.report(scaled as u8, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_sink_receives_updates() {
        let mut seen = Vec::new();
        {
            let mut sink = |p: u8, l: &str| seen.push((p, l.to_string()));
            sink.report(10, "Extracting tempo");
        }
        assert_eq!(seen, vec![(10, "Extracting tempo".to_string())]);
    }

    #[test]
    fn scaled_progress_maps_into_range() {
        let mut seen = Vec::new();
        let mut outer = |p: u8, _: &str| seen.push(p);
        {
            let mut scaled = ScaledProgress::new(&mut outer, 0, 80);
            scaled.report(0, "a");
            scaled.report(50, "b");
            scaled.report(100, "c");
            scaled.report(250, "clamped");
        }
        assert_eq!(seen, vec![0, 40, 80, 80]);
    }
}
