//! Character-window chunker with overlap and word-boundary extension.
//!
//! Offsets are code-point offsets into the source text, so clients that
//! index by character (editor highlights, citations) can slice without
//! knowing the UTF-8 byte layout. A window that would cut mid-word is
//! extended to the end of that word, capped at 1.25 × the window size.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Copy, Debug)]
pub struct ChunkingConfig {
	pub window_chars: u32,
	pub overlap_chars: u32,
}

impl Default for ChunkingConfig {
	fn default() -> Self {
		Self { window_chars: 800, overlap_chars: 100 }
	}
}

#[derive(Clone, Debug)]
pub struct Chunk {
	pub ordinal: u32,
	/// Code-point offset of the first character, inclusive.
	pub char_start: usize,
	/// Code-point offset one past the last character, exclusive.
	pub char_end: usize,
	pub text: String,
}

/// Lazy, restartable walk over `text`. Each call to [`chunks`] starts a
/// fresh iterator; nothing is consumed from the source.
pub fn chunks(text: &str, cfg: ChunkingConfig) -> Chunks<'_> {
	// Byte offset of every code point, plus a sentinel at the end, so char
	// ranges map straight onto string slices.
	let mut byte_offsets: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();

	byte_offsets.push(text.len());

	Chunks { text, byte_offsets, cfg, cursor: 0, ordinal: 0, done: text.is_empty() }
}

pub fn split_text(text: &str, cfg: ChunkingConfig) -> Vec<Chunk> {
	chunks(text, cfg).collect()
}

pub struct Chunks<'a> {
	text: &'a str,
	byte_offsets: Vec<usize>,
	cfg: ChunkingConfig,
	cursor: usize,
	ordinal: u32,
	done: bool,
}

impl Chunks<'_> {
	fn char_len(&self) -> usize {
		self.byte_offsets.len() - 1
	}

	fn slice(&self, char_start: usize, char_end: usize) -> &str {
		&self.text[self.byte_offsets[char_start]..self.byte_offsets[char_end]]
	}

	fn is_whitespace_at(&self, char_index: usize) -> bool {
		self.slice(char_index, char_index + 1).chars().all(char::is_whitespace)
	}
}

impl Iterator for Chunks<'_> {
	type Item = Chunk;

	fn next(&mut self) -> Option<Chunk> {
		if self.done {
			return None;
		}

		let len = self.char_len();
		let window = self.cfg.window_chars as usize;
		let start = self.cursor;
		let mut end = (start + window).min(len);

		// Extend a mid-word cut to the end of the word, up to the hard cap.
		if end < len && !self.is_whitespace_at(end) && !self.is_whitespace_at(end - 1) {
			let cap = (start + window + window / 4).min(len);
			let tail = &self.text[self.byte_offsets[end]..];

			if let Some(segment) = tail.split_word_bounds().next()
				&& !segment.trim().is_empty()
			{
				end = (end + segment.chars().count()).min(cap);
			}
		}

		let chunk = Chunk {
			ordinal: self.ordinal,
			char_start: start,
			char_end: end,
			text: self.slice(start, end).to_string(),
		};

		if end >= len {
			self.done = true;
		} else {
			let step = (self.cfg.window_chars - self.cfg.overlap_chars) as usize;

			self.cursor = start + step;
			self.ordinal += 1;
		}

		Some(chunk)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cfg(window: u32, overlap: u32) -> ChunkingConfig {
		ChunkingConfig { window_chars: window, overlap_chars: overlap }
	}

	fn char_slice(text: &str, start: usize, end: usize) -> String {
		text.chars().skip(start).take(end - start).collect()
	}

	#[test]
	fn empty_text_yields_no_chunks() {
		assert!(split_text("", cfg(10, 2)).is_empty());
	}

	#[test]
	fn short_text_is_one_chunk() {
		let chunks = split_text("tiny", cfg(10, 2));

		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].text, "tiny");
		assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 4));
	}

	#[test]
	fn spans_cover_the_whole_text() {
		let text = "word ".repeat(100);
		let chunks = split_text(&text, cfg(40, 10));
		let len = text.chars().count();

		assert_eq!(chunks[0].char_start, 0);
		assert_eq!(chunks.last().unwrap().char_end, len);

		for pair in chunks.windows(2) {
			assert!(pair[1].char_start <= pair[0].char_end, "gap between chunks");
		}
		for (ordinal, chunk) in chunks.iter().enumerate() {
			assert_eq!(chunk.ordinal as usize, ordinal);
			assert!(!chunk.text.is_empty());
		}
	}

	#[test]
	fn chunk_text_round_trips_through_offsets() {
		let text = "The cat sat on the mat. The dog ran over the log. ".repeat(20);
		let chunks = split_text(&text, cfg(80, 20));

		for chunk in &chunks {
			assert_eq!(chunk.text, char_slice(&text, chunk.char_start, chunk.char_end));
		}
	}

	#[test]
	fn successive_chunks_overlap_by_the_configured_amount() {
		// Window boundaries land on spaces, so no extension kicks in.
		let text = "abcd ".repeat(50);
		let chunks = split_text(&text, cfg(30, 10));

		assert!(chunks.len() > 2);

		for pair in chunks.windows(2) {
			if pair[1].char_end - pair[1].char_start == 30 {
				assert_eq!(pair[0].char_end - pair[1].char_start, 10);
			}
		}
	}

	#[test]
	fn mid_word_cut_extends_to_the_next_boundary() {
		let text = "alpha bravo charlie delta echo foxtrot";
		let chunks = split_text(text, cfg(8, 2));

		for chunk in &chunks {
			if chunk.char_end < text.chars().count() {
				let next = text.chars().nth(chunk.char_end).unwrap();
				let last = chunk.text.chars().last().unwrap();

				// Either the cut is clean or the cap stopped the extension.
				assert!(
					next.is_whitespace()
						|| last.is_whitespace() || chunk.char_end - chunk.char_start == 10,
					"chunk {:?} ends mid-word without hitting the cap",
					chunk.text
				);
			}
		}
	}

	#[test]
	fn extension_is_capped_at_a_quarter_window() {
		let text = "a".repeat(1_000);
		let chunks = split_text(&text, cfg(80, 10));

		for chunk in &chunks {
			assert!(chunk.char_end - chunk.char_start <= 100);
		}
	}

	#[test]
	fn offsets_count_code_points_not_bytes() {
		let text = "héllo wörld ".repeat(10);
		let chunks = split_text(&text, cfg(20, 5));

		assert_eq!(chunks.last().unwrap().char_end, text.chars().count());

		for chunk in &chunks {
			assert_eq!(chunk.text, char_slice(&text, chunk.char_start, chunk.char_end));
		}
	}

	#[test]
	fn iterator_is_restartable() {
		let text = "one two three four five six seven eight nine ten";
		let first: Vec<_> = chunks(text, cfg(12, 4)).map(|c| c.text).collect();
		let second: Vec<_> = chunks(text, cfg(12, 4)).map(|c| c.text).collect();

		assert_eq!(first, second);
	}
}
