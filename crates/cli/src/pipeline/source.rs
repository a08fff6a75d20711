//! LineSource - newline-delimited records from an async reader
//!
//! 每个非空行是一条记录，position token 为行号（从 1 开始）。
//! 配置了 route_field 时，从 JSON 对象中取该字段的字符串值作为 routing key；
//! 非 JSON 或缺少该字段的行不带 routing key。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use contracts::Record;

use crate::error::CliError;

pub struct LineSource<R> {
    lines: Lines<R>,
    route_field: Option<String>,
    line: u64,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R, route_field: Option<String>) -> Self {
        Self {
            lines: reader.lines(),
            route_field,
            line: 0,
        }
    }

    /// Lines consumed so far, blank ones included
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    /// Next record, or `None` at end of input
    pub async fn next_record(&mut self) -> Result<Option<Record>, CliError> {
        loop {
            let next = self.lines.next_line().await.map_err(|source| CliError::Input {
                line: self.line + 1,
                source,
            })?;
            let Some(text) = next else {
                return Ok(None);
            };
            self.line += 1;

            if text.trim().is_empty() {
                continue;
            }

            let record = match self.routing_key(&text) {
                Some(key) => Record::routed(text, self.line, key),
                None => Record::new(text, self.line),
            };
            return Ok(Some(record));
        }
    }

    fn routing_key(&self, text: &str) -> Option<String> {
        let field = self.route_field.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        value.get(field)?.as_str().map(str::to_string)
    }
}
