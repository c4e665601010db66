//! Paced emission of assistant text as partial `ai_message` events.
//!
//! All partials of one logical message share a `stream_id` and carry
//! non-decreasing `progress`; the sequence always ends with one non-partial
//! event holding the full content. Character and word mode differ only in
//! pacing — the final text is identical.

use std::time::Duration;

use cf_domain::config::StreamingMode;
use cf_domain::event::EventPayload;

use super::bus::SessionChannel;

/// Emit `content` on the channel in the configured mode.
pub async fn stream_ai_message(channel: &SessionChannel, content: &str, mode: StreamingMode) {
    if content.is_empty() {
        return;
    }
    match mode {
        StreamingMode::Off => {
            channel.emit(EventPayload::ai_message(content));
        }
        StreamingMode::Character => stream_characters(channel, content).await,
        StreamingMode::Word => stream_words(channel, content).await,
    }
}

async fn stream_characters(channel: &SessionChannel, content: &str) {
    let stream_id = uuid::Uuid::new_v4().to_string();
    let chars: Vec<char> = content.chars().collect();
    let total = chars.len();

    let mut streamed = String::new();
    for (i, c) in chars.iter().enumerate() {
        streamed.push(*c);
        channel.emit(EventPayload::AiMessage {
            content: streamed.clone(),
            is_partial: true,
            progress: Some((i + 1) as f32 / total as f32),
            stream_id: Some(stream_id.clone()),
        });

        let pause = match c {
            '.' | '!' | '?' | ',' | ';' | ':' => Duration::from_millis(50),
            ' ' => Duration::from_millis(10),
            _ => Duration::from_millis(20),
        };
        tokio::time::sleep(pause).await;
    }

    channel.emit(EventPayload::AiMessage {
        content: content.to_string(),
        is_partial: false,
        progress: Some(1.0),
        stream_id: Some(stream_id),
    });
}

async fn stream_words(channel: &SessionChannel, content: &str) {
    let stream_id = uuid::Uuid::new_v4().to_string();
    let words: Vec<&str> = content.split(' ').collect();
    let total = words.len();

    let mut streamed = String::new();
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            streamed.push(' ');
        }
        streamed.push_str(word);
        channel.emit(EventPayload::AiMessage {
            content: streamed.clone(),
            is_partial: true,
            progress: Some((i + 1) as f32 / total as f32),
            stream_id: Some(stream_id.clone()),
        });

        let pause = if word.ends_with(['.', '!', '?']) {
            Duration::from_millis(100)
        } else if word.ends_with([',', ';', ':']) {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(30)
        };
        tokio::time::sleep(pause).await;
    }

    channel.emit(EventPayload::AiMessage {
        content: content.to_string(),
        is_partial: false,
        progress: Some(1.0),
        stream_id: Some(stream_id),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::event::Event;

    fn ai_fields(event: &Event) -> (String, bool, f32, Option<String>) {
        match &event.payload {
            EventPayload::AiMessage {
                content,
                is_partial,
                progress,
                stream_id,
            } => (
                content.clone(),
                *is_partial,
                progress.unwrap_or(0.0),
                stream_id.clone(),
            ),
            other => panic!("expected ai_message, got {other:?}"),
        }
    }

    fn assert_monotone_stream(events: &[Event], expected_final: &str) {
        let fields: Vec<_> = events.iter().map(ai_fields).collect();
        let (_, _, _, first_stream) = &fields[0];

        let mut last_progress = 0.0;
        let mut last_len = 0;
        for (content, _, progress, stream_id) in &fields {
            assert_eq!(stream_id, first_stream, "stream id must be shared");
            assert!(*progress >= last_progress, "progress must not decrease");
            assert!(content.len() >= last_len, "content must only grow");
            last_progress = *progress;
            last_len = content.len();
        }

        let (content, is_partial, progress, _) = fields.last().unwrap();
        assert!(!is_partial);
        assert_eq!(content, expected_final);
        assert_eq!(*progress, 1.0);
        // Exactly one non-partial event, at the end.
        assert_eq!(fields.iter().filter(|(_, p, _, _)| !p).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn word_mode_is_monotone_and_complete() {
        let channel = SessionChannel::new_for_tests("s1");
        stream_ai_message(&channel, "Hello there, friend.", StreamingMode::Word).await;
        assert_monotone_stream(&channel.buffered(), "Hello there, friend.");
        // 3 word partials + 1 final.
        assert_eq!(channel.buffered().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn character_mode_is_monotone_and_complete() {
        let channel = SessionChannel::new_for_tests("s1");
        stream_ai_message(&channel, "Hi.", StreamingMode::Character).await;
        assert_monotone_stream(&channel.buffered(), "Hi.");
        assert_eq!(channel.buffered().len(), 4); // 3 char partials + final
    }

    #[tokio::test]
    async fn off_mode_emits_one_whole_message() {
        let channel = SessionChannel::new_for_tests("s1");
        stream_ai_message(&channel, "whole", StreamingMode::Off).await;
        let events = channel.buffered();
        assert_eq!(events.len(), 1);
        let (content, is_partial, _, stream_id) = ai_fields(&events[0]);
        assert_eq!(content, "whole");
        assert!(!is_partial);
        assert!(stream_id.is_none());
    }
}
