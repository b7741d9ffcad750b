use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// How records are laid out in a batch
///
/// On disk a batch file holds only the records joined by `separator`. The `prefix` and
/// `suffix` are added when the batch is read for upload.
///
/// With `json_records` every record must be one JSON value and the separator is only
/// looked for between values, so it may appear inside a record. Otherwise a record may
/// not contain the separator at all.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataFormat {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub json_records: bool,
}

fn default_separator() -> String {
    "\n".to_string()
}

impl Default for DataFormat {
    fn default() -> Self {
        Self::newline()
    }
}

impl DataFormat {
    /// Newline-delimited records, no wrapping (tracing, RUM)
    pub fn newline() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            separator: default_separator(),
            json_records: false,
        }
    }

    /// Records as the elements of a JSON array (logging)
    pub fn json_array() -> Self {
        Self {
            prefix: "[".to_string(),
            suffix: "]".to_string(),
            separator: ",".to_string(),
            json_records: true,
        }
    }

    pub fn separator_bytes(&self) -> &[u8] {
        self.separator.as_bytes()
    }

    /// Check that a record can be stored and split back out unchanged
    pub fn check_record(&self, record: &[u8]) -> Result<(), String> {
        if record.is_empty() {
            return Err("record is empty".to_string());
        }

        if self.json_records {
            if record.first().is_some_and(u8::is_ascii_whitespace)
                || record.last().is_some_and(u8::is_ascii_whitespace)
            {
                return Err("JSON record has surrounding whitespace".to_string());
            }
            serde_json::from_slice::<IgnoredAny>(record)
                .map_err(|e| format!("record is not a single JSON value: {}", e))?;
            return Ok(());
        }

        let separator = self.separator_bytes();
        if !separator.is_empty() && find(record, separator).is_some() {
            return Err(format!("record contains the separator {:?}", self.separator));
        }
        Ok(())
    }

    /// Upload payload for the given file content
    pub fn wrap(&self, content: &[u8]) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.prefix.len() + content.len() + self.suffix.len());
        payload.extend_from_slice(self.prefix.as_bytes());
        payload.extend_from_slice(content);
        payload.extend_from_slice(self.suffix.as_bytes());
        payload
    }

    /// Split file content back into records
    ///
    /// Content that does not parse is returned as a single record; the reader never
    /// hands out such content since [`DataFormat::validate`] rejects it.
    pub fn split<'a>(&self, content: &'a [u8]) -> Vec<&'a [u8]> {
        self.parse(content).unwrap_or_else(|_| vec![content])
    }

    /// Check file content against this format
    ///
    /// Fails only for content no sequence of accepted records can produce, which means
    /// an interrupted write.
    pub fn validate(&self, content: &[u8]) -> Result<(), String> {
        if content.is_empty() {
            return Err("batch file is empty".to_string());
        }
        self.parse(content).map(|_| ())
    }

    fn parse<'a>(&self, content: &'a [u8]) -> Result<Vec<&'a [u8]>, String> {
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let separator = self.separator_bytes();
        let mut records = Vec::new();
        let mut rest = content;

        loop {
            let (record, tail) = if self.json_records {
                let mut values =
                    serde_json::Deserializer::from_slice(rest).into_iter::<IgnoredAny>();
                match values.next() {
                    Some(Ok(_)) => rest.split_at(values.byte_offset()),
                    Some(Err(e)) => {
                        return Err(format!("record {} is not JSON: {}", records.len(), e))
                    }
                    None => return Err("batch file ends without a record".to_string()),
                }
            } else if separator.is_empty() {
                (rest, &rest[rest.len()..])
            } else {
                match find(rest, separator) {
                    Some(at) => rest.split_at(at),
                    None => (rest, &rest[rest.len()..]),
                }
            };

            if record.is_empty() {
                return Err(format!("record {} is empty", records.len()));
            }
            records.push(record);

            if tail.is_empty() {
                return Ok(records);
            }
            if separator.is_empty() {
                rest = tail;
                continue;
            }
            match tail.strip_prefix(separator) {
                Some(next) => rest = next,
                None => {
                    return Err(format!(
                        "record {} is not followed by a separator",
                        records.len() - 1
                    ))
                }
            }
            if rest.is_empty() {
                return Err("batch file ends with a separator".to_string());
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
