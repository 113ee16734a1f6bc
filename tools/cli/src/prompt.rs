//! Interactive conflict resolution on the terminal.

use std::io::{self, BufRead, Write};
use tracing::error;

use gitvault_sync::{ConflictFile, ConflictReceiver, ConflictResolution};

/// Answer conflict requests from stdin until the engine goes away.
pub async fn answer_conflicts(mut requests: ConflictReceiver) {
    while let Some(request) = requests.recv().await {
        let conflicts = request.conflicts.clone();
        let answer = tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            let stdout = io::stdout();
            ask(&conflicts, &mut stdin.lock(), &mut stdout.lock())
        })
        .await;

        match answer {
            Ok(Ok(resolutions)) => request.respond(resolutions),
            // Dropping the request fails the pass; nothing is published.
            Ok(Err(e)) => error!("Failed to read conflict answer: {}", e),
            Err(e) => error!("Conflict prompt panicked: {}", e),
        }
    }
}

/// Ask which side wins for every conflict.
pub fn ask<R: BufRead, W: Write>(
    conflicts: &[ConflictFile],
    input: &mut R,
    output: &mut W,
) -> io::Result<Vec<ConflictResolution>> {
    writeln!(output, "{} file(s) changed on both sides.", conflicts.len())?;

    let mut resolutions = Vec::with_capacity(conflicts.len());
    for conflict in conflicts {
        writeln!(
            output,
            "\n{}: local {} bytes, remote {} bytes",
            conflict.file_path,
            conflict.local_content.len(),
            conflict.remote_content.len()
        )?;
        preview(output, "local", &conflict.local_content)?;
        preview(output, "remote", &conflict.remote_content)?;

        let content = loop {
            write!(output, "Keep [l]ocal or [r]emote? ")?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stdin closed before all conflicts were answered",
                ));
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "l" | "local" => break conflict.local_content.clone(),
                "r" | "remote" => break conflict.remote_content.clone(),
                _ => writeln!(output, "Please answer l or r.")?,
            }
        };

        resolutions.push(ConflictResolution {
            file_path: conflict.file_path.clone(),
            content,
        });
    }
    Ok(resolutions)
}

fn preview<W: Write>(output: &mut W, label: &str, content: &[u8]) -> io::Result<()> {
    match std::str::from_utf8(content) {
        Ok(text) => {
            let first = text.lines().next().unwrap_or("");
            writeln!(output, "  {:>6}: {}", label, first)
        }
        Err(_) => writeln!(output, "  {:>6}: <binary>", label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitvault_common::RepoPath;
    use std::io::Cursor;

    fn conflict(path: &str) -> ConflictFile {
        ConflictFile {
            file_path: RepoPath::parse(path).unwrap(),
            remote_content: b"remote line\n".to_vec(),
            local_content: b"local line\n".to_vec(),
        }
    }

    #[test]
    fn test_answers_in_order() {
        let mut input = Cursor::new("l\nremote\n");
        let mut output = Vec::new();

        let resolutions = ask(&[conflict("a.md"), conflict("b.md")], &mut input, &mut output).unwrap();

        assert_eq!(resolutions[0].content, b"local line\n");
        assert_eq!(resolutions[1].content, b"remote line\n");
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("a.md: local 11 bytes, remote 12 bytes"));
        assert!(shown.contains("local: local line"));
    }

    #[test]
    fn test_repeats_on_unknown_answer() {
        let mut input = Cursor::new("maybe\nR\n");
        let mut output = Vec::new();

        let resolutions = ask(&[conflict("a.md")], &mut input, &mut output).unwrap();

        assert_eq!(resolutions[0].content, b"remote line\n");
        assert!(String::from_utf8(output).unwrap().contains("Please answer l or r."));
    }

    #[test]
    fn test_eof_is_an_error() {
        let mut input = Cursor::new("");
        let mut output = Vec::new();

        let err = ask(&[conflict("a.md")], &mut input, &mut output).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
