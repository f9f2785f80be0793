//! Line decoder for `text/event-stream` bodies.
//!
//! Feed it one line at a time (without the trailing newline); it yields an
//! event whenever a blank line closes one that carried data.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` name, `None` for the default `message` event.
    pub name: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry: reconnection is ours to manage
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let name = self.name.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent { name, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut SseDecoder, body: &str) -> Vec<SseEvent> {
        body.split('\n').filter_map(|l| decoder.push_line(l)).collect()
    }

    #[test]
    fn test_default_and_named_events() {
        let mut decoder = SseDecoder::new();
        let events = feed(
            &mut decoder,
            "data: {\"a\":1}\n\nevent: status\ndata: {\"b\":2}\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent {
                    name: None,
                    data: "{\"a\":1}".into()
                },
                SseEvent {
                    name: Some("status".into()),
                    data: "{\"b\":2}".into()
                },
            ]
        );
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = feed(&mut decoder, ": keep-alive\r\ndata: {\r\ndata: }\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\n}");
    }

    #[test]
    fn test_blank_lines_without_data_yield_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(feed(&mut decoder, "\n\nevent: ping\n\n").is_empty());
        // the dangling name does not leak into the next event
        let events = feed(&mut decoder, "data:x\n\n");
        assert_eq!(events[0].name, None);
        assert_eq!(events[0].data, "x");
    }
}
