use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Text keyed by a time offset in seconds, kept in insertion order.
///
/// Serializes as a JSON object; keys are unique and a repeated key
/// overwrites the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimedText {
    entries: Vec<(String, String)>,
}

impl TimedText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the text at `offset`
    pub fn insert(&mut self, offset: impl Into<String>, text: impl Into<String>) {
        let offset = offset.into();
        let text = text.into();

        match self.entries.iter_mut().find(|(key, _)| *key == offset) {
            Some((_, existing)) => *existing = text,
            None => self.entries.push((offset, text)),
        }
    }

    pub fn get(&self, offset: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == offset)
            .map(|(_, text)| text.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TimedText {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut timed = TimedText::new();
        for (offset, text) in iter {
            timed.insert(offset, text);
        }
        timed
    }
}

impl Serialize for TimedText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (offset, text) in &self.entries {
            map.serialize_entry(offset, text)?;
        }
        map.end()
    }
}

struct TimedTextVisitor;

impl<'de> Visitor<'de> for TimedTextVisitor {
    type Value = TimedText;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of time offsets to text")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut timed = TimedText::new();
        while let Some((offset, text)) = access.next_entry::<String, String>()? {
            timed.insert(offset, text);
        }
        Ok(timed)
    }
}

impl<'de> Deserialize<'de> for TimedText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TimedTextVisitor)
    }
}

/// Final artifact of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoKnowledge {
    /// Transcript segments keyed by start second
    pub transcript: TimedText,
    /// Cleaned on-screen text keyed by time offset
    pub on_screen_text: TimedText,
    pub scene_description: String,
}

impl VideoKnowledge {
    /// Render the record as the context a question-answering model is primed with
    pub fn to_context_prompt(&self) -> String {
        let transcript = serde_json::to_string_pretty(&self.transcript).unwrap_or_default();
        let on_screen_text = serde_json::to_string_pretty(&self.on_screen_text).unwrap_or_default();

        format!(
            "The following information describes a video.\n\n\
            1. The transcript of the video, showing the start of each segment in seconds (as the key) and the text of the segment (as the value):\n\
            {}\n\n\
            2. The result of OCR, which shows the start time of each detected word in the video as the key and the word as the value:\n\
            {}\n\n\
            3. A description of the video:\n\
            {}\n",
            transcript, on_screen_text, self.scene_description
        )
    }
}
