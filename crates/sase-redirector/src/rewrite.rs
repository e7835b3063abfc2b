//! URL-rewrite line protocol
//!
//! One request per input line: the first whitespace-separated token is the
//! URL, the rest is passed through untouched. One answer line per request.

use sase_reputation::{LookupService, ReputationConfig};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Turns request lines into answer lines
pub struct Rewriter {
    service: LookupService,
    config: ReputationConfig,
}

impl Rewriter {
    pub fn new(config: &ReputationConfig) -> Self {
        Self {
            service: LookupService::from_config(config),
            config: config.clone(),
        }
    }

    /// Answer for one request line, without the line terminator
    pub fn respond(&mut self, line: &str) -> String {
        let line = line.trim();
        let mut tokens = line.split([' ', '\t']).filter(|t| !t.is_empty());

        let Some(url) = tokens.next() else {
            return String::new();
        };

        match self.service.lookup(url) {
            Some(hit) => {
                let target = self.config.redirect_for(&hit.list).unwrap_or(&hit.url);
                debug!("{} listed in {}, answering {}", url, hit.list, target);

                let mut reply = target.to_string();
                for token in tokens {
                    reply.push(' ');
                    reply.push_str(token);
                }
                reply
            }
            None if self.config.emit_empty => String::new(),
            None => line.to_string(),
        }
    }

    /// Answer for a raw request line. A line that is not UTF-8 is never
    /// listed and gets the no-match answer with its bytes kept as they are.
    pub fn respond_raw(&mut self, line: &[u8]) -> Vec<u8> {
        match std::str::from_utf8(line) {
            Ok(line) => self.respond(line).into_bytes(),
            Err(e) => {
                debug!("Request line is not UTF-8: {}", e);
                if self.config.emit_empty {
                    Vec::new()
                } else {
                    trim_bytes(line).to_vec()
                }
            }
        }
    }
}

fn trim_bytes(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// Answer every line of `input` on `output` until end of input.
///
/// Returns the number of lines answered.
pub async fn serve<R, W>(rewriter: &mut Rewriter, mut input: R, mut output: W) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let mut served = 0;

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        let reply = rewriter.respond_raw(&line);
        output.write_all(&reply).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        served += 1;
    }
    Ok(served)
}
