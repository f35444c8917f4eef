//! PCM frame sources: chop any byte reader into capture-sized frames.

use std::io;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use echolens_core::protocol::AudioSpec;

/// A frame of raw audio, or the read error that ended the source.
pub type FrameStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// Read `reader` as consecutive frames of `frame_bytes` bytes.
///
/// The last frame may be shorter. The stream ends at EOF or after the first
/// read error.
pub fn pcm_frames<R>(reader: R, frame_bytes: usize) -> FrameStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let frame_bytes = frame_bytes.max(1);
    futures::stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        let mut frame = vec![0u8; frame_bytes];
        let mut filled = 0;

        while filled < frame_bytes {
            match reader.read(&mut frame[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some((Err(e), None)),
            }
        }
        if filled == 0 {
            return None;
        }

        frame.truncate(filled);
        // A short frame means EOF was reached.
        let next = (filled == frame_bytes).then_some(reader);
        Some((Ok(frame), next))
    })
    .boxed()
}

/// Release frames no faster than they would be captured live.
///
/// Each frame is held until the audio before and including it has had time
/// to be spoken, measured from the first poll.
pub fn paced<S>(frames: S, spec: AudioSpec) -> FrameStream
where
    S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
{
    let mut origin: Option<Instant> = None;
    let mut captured = std::time::Duration::ZERO;

    frames
        .then(move |item| {
            let origin = *origin.get_or_insert_with(Instant::now);
            if let Ok(frame) = &item {
                captured += spec.duration_of(frame.len());
            }
            let release = origin + captured;
            async move {
                tokio::time::sleep_until(release).await;
                item
            }
        })
        .boxed()
}
