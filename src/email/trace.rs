use crate::email::address::join;
use crate::email::PartialEmail;
use std::fmt::Display;
use std::io::{self, Write};

/// Write the development mode dump of an email
///
/// Fixed field order, CRLF terminated lines, absent recipient classes
/// omitted, then a blank line, the body, and one `FILE:` line per attachment.
/// Unresolved single-valued fields are written empty.
pub fn write_trace<W: Write + ?Sized>(writer: &mut W, email: &PartialEmail) -> io::Result<()> {
    write!(writer, "FROM: {}\r\n", or_empty(email.from.as_ref()))?;
    write!(writer, "ENVELOPE FROM: {}\r\n", or_empty(email.envelope_from.as_ref()))?;

    if let Some(to) = &email.to {
        write!(writer, "TO: {}\r\n", join(to))?;
    }
    if let Some(cc) = &email.cc {
        write!(writer, "CC: {}\r\n", join(cc))?;
    }
    if let Some(bcc) = &email.bcc {
        write!(writer, "BCC: {}\r\n", join(bcc))?;
    }

    write!(writer, "CONTENT TYPE: {}\r\n", or_empty(email.content_type.as_ref()))?;
    write!(writer, "SUBJECT: {}\r\n", or_empty(email.subject.as_ref()))?;

    write!(writer, "\r\n{}\r\n", or_empty(email.body.as_ref()))?;

    for file in &email.attachments {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        write!(writer, "FILE: {}\r\n", name)?;
    }

    writer.flush()
}

/// Trace as a string
pub fn render_trace(email: &PartialEmail) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_trace(&mut buffer, email);
    String::from_utf8_lossy(&buffer).into_owned()
}

fn or_empty<T: Display>(value: Option<&T>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}
