//! The fill callback the engine pulls audio from.

/// Source of interleaved audio blocks.
///
/// `fill` must overwrite the whole slice (`channels * block_frames`
/// samples) with the next block and return promptly: it runs on the fill
/// thread, and a slow fill is heard as a gap. The engine never calls it
/// concurrently with itself; anything it shares with other threads is its
/// own business to lock.
pub trait Producer: Send + 'static {
    fn fill(&mut self, out: &mut [f32]);
}

impl<F> Producer for F
where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    fn fill(&mut self, out: &mut [f32]) {
        self(out)
    }
}

/// Producer that writes silence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl Producer for Silence {
    fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);
    }
}
