use aws_sdk_bedrockruntime::types::ConverseStreamOutput;
use bedrock_core::{BedrockError, ModelOutput, Result};
use tracing::{debug, warn};

use crate::usage_to_stats;

/// Drain a Converse event stream, forwarding text deltas to `on_chunk` and
/// assembling the full reply.
pub(crate) async fn collect_text_stream<E>(
    stream: impl tokio_stream::Stream<Item = std::result::Result<ConverseStreamOutput, E>>,
    mut on_chunk: impl FnMut(&str),
) -> Result<ModelOutput>
where
    E: std::fmt::Display,
{
    use tokio_stream::StreamExt;
    tokio::pin!(stream);

    let mut output = ModelOutput::default();

    while let Some(event) = stream.next().await {
        match event {
            Ok(ConverseStreamOutput::ContentBlockDelta(delta)) => {
                if let Some(text) = delta.delta().and_then(|d| d.as_text().ok()) {
                    on_chunk(text.as_str());
                    output.text.push_str(text);
                }
            }
            Ok(ConverseStreamOutput::MessageStop(stop)) => {
                // metadata with token usage follows the stop event
                debug!("Streaming completed with stop reason: {:?}", stop.stop_reason());
            }
            Ok(ConverseStreamOutput::Metadata(metadata)) => {
                output.usage = metadata.usage().map(usage_to_stats);
                debug!("Metadata received, ending stream processing");
                break;
            }
            Ok(other) => {
                debug!("Ignoring stream event: {:?}", other);
            }
            Err(e) => {
                warn!("Stream error: {}", e);
                return Err(BedrockError::InvocationError(format!("Stream error: {e}")));
            }
        }
    }

    Ok(output)
}
