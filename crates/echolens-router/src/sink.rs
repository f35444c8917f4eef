//! Output sinks for recognized text.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Payload bytes per write on a BLE characteristic with the default ATT MTU.
pub const DEFAULT_PERIPHERAL_MTU: usize = 20;

/// Destination for substantive recognized text.
#[async_trait]
pub trait TextSink: Send + Sync + 'static {
    /// Short identifier for logs (e.g., "console", "peripheral").
    fn id(&self) -> &str;

    /// Deliver one piece of text. `is_final` marks a committed result.
    async fn deliver(&self, text: &str, is_final: bool) -> anyhow::Result<()>;
}

/// Prints results to stdout. Partial results are shown only when enabled.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    show_partials: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partials(mut self, show: bool) -> Self {
        self.show_partials = show;
        self
    }
}

#[async_trait]
impl TextSink for ConsoleSink {
    fn id(&self) -> &str {
        "console"
    }

    async fn deliver(&self, text: &str, is_final: bool) -> anyhow::Result<()> {
        if is_final {
            println!("{text}");
        } else if self.show_partials {
            println!("… {text}");
        }
        Ok(())
    }
}

/// Writes text to a peripheral link in MTU-sized writes.
///
/// Chunks never split a UTF-8 character, so each write is valid text on
/// its own. Final results are terminated with a newline.
pub struct PeripheralSink<W> {
    writer: Mutex<W>,
    mtu: usize,
}

impl<W: AsyncWrite + Unpin + Send + 'static> PeripheralSink<W> {
    pub fn new(writer: W) -> Self {
        Self::with_mtu(writer, DEFAULT_PERIPHERAL_MTU)
    }

    pub fn with_mtu(writer: W, mtu: usize) -> Self {
        Self {
            writer: Mutex::new(writer),
            mtu: mtu.max(1),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> TextSink for PeripheralSink<W> {
    fn id(&self) -> &str {
        "peripheral"
    }

    async fn deliver(&self, text: &str, is_final: bool) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        let chunks = utf8_chunks(text, self.mtu);
        for chunk in &chunks {
            writer.write_all(chunk.as_bytes()).await?;
        }
        if is_final {
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        debug!(bytes = text.len(), writes = chunks.len(), is_final, "Text written to peripheral");
        Ok(())
    }
}

/// Split `text` into pieces of at most `max` bytes on character boundaries.
///
/// A character wider than `max` gets a piece of its own.
pub fn utf8_chunks(text: &str, max: usize) -> Vec<&str> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        let end = idx + ch.len_utf8();
        if end - start > max && idx > start {
            chunks.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_chunks_ascii() {
        assert_eq!(utf8_chunks("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(utf8_chunks("abc", 3), vec!["abc"]);
        assert!(utf8_chunks("", 20).is_empty());
    }

    #[test]
    fn test_utf8_chunks_never_split_chars() {
        // "ñ" is two bytes, "😀" four.
        let text = "añoñ😀b";
        let chunks = utf8_chunks(text, 3);
        assert_eq!(chunks, vec!["añ", "oñ", "😀", "b"]);
        assert_eq!(chunks.concat(), text);
        for chunk in utf8_chunks("canción de la mañana", DEFAULT_PERIPHERAL_MTU) {
            assert!(chunk.len() <= DEFAULT_PERIPHERAL_MTU);
        }
    }

    #[test]
    fn test_utf8_chunks_oversized_char() {
        assert_eq!(utf8_chunks("😀😀", 2), vec!["😀", "😀"]);
    }

    #[tokio::test]
    async fn test_peripheral_sink_writes_text() {
        let sink = PeripheralSink::with_mtu(Vec::<u8>::new(), 4);
        sink.deliver("hola mundo", false).await.unwrap();
        sink.deliver("adiós", true).await.unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "hola mundoadiós\n");
    }

    #[tokio::test]
    async fn test_peripheral_sink_chunked_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let sink = PeripheralSink::with_mtu(client, 5);
        sink.deliver("¿qué tal?", true).await.unwrap();
        drop(sink);

        let mut received = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut received)
            .await
            .unwrap();
        assert_eq!(received, "¿qué tal?\n");
    }
}
