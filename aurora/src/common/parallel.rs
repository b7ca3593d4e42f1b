//! Parallel processing utilities.

/// Chunks scheduled per rayon thread.
const CHUNKS_PER_THREAD: usize = 2;

/// Rows per chunk when splitting `height` rows into about
/// `CHUNKS_PER_THREAD` chunks per thread. Never 0.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}
