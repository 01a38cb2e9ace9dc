//! Plain-text extraction for uploaded corpus documents.
//!
//! Dispatch is by file extension: PDF via `pdf-extract`, plain text and
//! markdown passed through with BOM stripping, DOCX body text pulled from
//! `word/document.xml`. Output preserves paragraph boundaries as `\n\n`
//! and intra-paragraph breaks as `\n`.

use std::io::Read;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decompressed ceiling for a single ZIP entry, against archive bombs.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Unsupported format: {extension}")]
	UnsupportedFormat { extension: String },
	#[error("Parse failure: {message}")]
	ParseFailure { message: String },
}

impl Error {
	fn parse(message: impl Into<String>) -> Self {
		Self::ParseFailure { message: message.into() }
	}
}

/// Extracts plain text from `bytes`, dispatching on the extension of
/// `filename`.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
	let extension = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();

	let text = match extension.as_str() {
		"pdf" => extract_pdf(bytes)?,
		"txt" | "text" | "md" | "markdown" => extract_plain(bytes)?,
		"docx" => extract_docx(bytes)?,
		_ => return Err(Error::UnsupportedFormat { extension }),
	};

	Ok(normalize(&text))
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
	pdf_extract::extract_text_from_mem(bytes).map_err(|err| Error::parse(err.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String> {
	let text =
		String::from_utf8(bytes.to_vec()).map_err(|_| Error::parse("file is not valid UTF-8"))?;

	Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
	let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
		.map_err(|err| Error::parse(err.to_string()))?;
	let entry = archive
		.by_name("word/document.xml")
		.map_err(|_| Error::parse("word/document.xml not found"))?;
	let mut xml = Vec::new();

	entry
		.take(MAX_XML_ENTRY_BYTES)
		.read_to_end(&mut xml)
		.map_err(|err| Error::parse(err.to_string()))?;

	if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
		return Err(Error::parse("word/document.xml exceeds size limit"));
	}

	extract_docx_body(&xml)
}

/// Walks the document XML collecting `w:t` runs; paragraph ends become
/// blank lines and explicit breaks become single newlines.
fn extract_docx_body(xml: &[u8]) -> Result<String> {
	let mut out = String::new();
	let mut reader = quick_xml::Reader::from_reader(xml);
	let mut buf = Vec::new();
	let mut in_text_run = false;

	loop {
		match reader.read_event_into(&mut buf) {
			Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
				b"t" => in_text_run = true,
				b"br" => out.push('\n'),
				_ => {},
			},
			Ok(quick_xml::events::Event::Empty(e)) =>
				if e.local_name().as_ref() == b"br" {
					out.push('\n');
				},
			Ok(quick_xml::events::Event::Text(e)) if in_text_run => {
				out.push_str(e.decode().map_err(|err| Error::parse(err.to_string()))?.as_ref());
			},
			Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
				b"t" => in_text_run = false,
				b"p" => out.push_str("\n\n"),
				_ => {},
			},
			Ok(quick_xml::events::Event::Eof) => break,
			Err(err) => return Err(Error::parse(err.to_string())),
			_ => {},
		}

		buf.clear();
	}

	Ok(out)
}

/// Normalizes line endings and collapses runs of blank lines so paragraph
/// boundaries are exactly one blank line.
fn normalize(text: &str) -> String {
	let unified = text.replace("\r\n", "\n").replace('\r', "\n");
	let mut out = String::with_capacity(unified.len());
	let mut newline_run = 0_usize;

	for ch in unified.chars() {
		if ch == '\n' {
			newline_run += 1;

			if newline_run <= 2 {
				out.push(ch);
			}
		} else {
			newline_run = 0;

			out.push(ch);
		}
	}

	out.trim_end_matches('\n').trim_start_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	fn docx_bytes(document_xml: &str) -> Vec<u8> {
		let mut cursor = std::io::Cursor::new(Vec::new());
		let mut writer = zip::ZipWriter::new(&mut cursor);
		let options = zip::write::SimpleFileOptions::default();

		writer.start_file("word/document.xml", options).expect("start_file failed");
		writer.write_all(document_xml.as_bytes()).expect("write failed");
		writer.finish().expect("finish failed");

		cursor.into_inner()
	}

	#[test]
	fn unknown_extension_is_unsupported() {
		let err = extract_text(b"data", "notes.xyz").unwrap_err();

		assert!(matches!(err, Error::UnsupportedFormat { .. }));
	}

	#[test]
	fn invalid_pdf_is_a_parse_failure() {
		let err = extract_text(b"not a pdf", "paper.pdf").unwrap_err();

		assert!(matches!(err, Error::ParseFailure { .. }));
	}

	#[test]
	fn plain_text_passes_through_with_bom_stripped() {
		let mut bytes = vec![0xEF, 0xBB, 0xBF];

		bytes.extend_from_slice("first line\r\nsecond line".as_bytes());

		let text = extract_text(&bytes, "notes.txt").expect("extract failed");

		assert_eq!(text, "first line\nsecond line");
	}

	#[test]
	fn invalid_utf8_is_a_parse_failure() {
		let err = extract_text(&[0xFF, 0xFE, 0x00], "notes.md").unwrap_err();

		assert!(matches!(err, Error::ParseFailure { .. }));
	}

	#[test]
	fn markdown_keeps_paragraph_boundaries() {
		let text =
			extract_text(b"# Title\n\n\n\nFirst paragraph.\n\nSecond paragraph.\n\n\n", "doc.md")
				.expect("extract failed");

		assert_eq!(text, "# Title\n\nFirst paragraph.\n\nSecond paragraph.");
	}

	#[test]
	fn docx_body_text_is_extracted_with_paragraphs() {
		let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
	<w:body>
		<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
		<w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
	</w:body>
</w:document>"#;
		let text = extract_text(&docx_bytes(xml), "letter.docx").expect("extract failed");

		assert_eq!(text, "Hello world\n\nSecond paragraph");
	}

	#[test]
	fn docx_without_document_xml_is_a_parse_failure() {
		let mut cursor = std::io::Cursor::new(Vec::new());
		let mut writer = zip::ZipWriter::new(&mut cursor);
		let options = zip::write::SimpleFileOptions::default();

		writer.start_file("other.xml", options).expect("start_file failed");
		writer.finish().expect("finish failed");

		let err = extract_text(&cursor.into_inner(), "letter.docx").unwrap_err();

		assert!(matches!(err, Error::ParseFailure { .. }));
	}

	#[test]
	fn invalid_zip_is_a_parse_failure_for_docx() {
		let err = extract_text(b"not a zip", "letter.docx").unwrap_err();

		assert!(matches!(err, Error::ParseFailure { .. }));
	}
}
