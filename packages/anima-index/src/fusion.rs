//! Reciprocal rank fusion of dense and lexical sub-rankings.
//!
//! `s(c) = 1/(60 + rank_d) + 1/(60 + rank_l)`, a missing rank contributes
//! zero, and a chunk present in both lists gets a 1.2× bonus. Ties break
//! by document id then ordinal so the output is deterministic.

use crate::RetrievalHit;

pub const RRF_K: f32 = 60.0;
pub const OVERLAP_BONUS: f32 = 1.2;

pub fn fuse(dense: &[RetrievalHit], lexical: &[RetrievalHit], k: usize) -> Vec<RetrievalHit> {
	let mut fused: Vec<RetrievalHit> = Vec::with_capacity(dense.len() + lexical.len());

	for (rank, hit) in dense.iter().enumerate() {
		let mut hit = hit.clone();

		hit.dense_rank = Some(rank as u32 + 1);
		hit.lexical_rank = None;

		fused.push(hit);
	}

	for (rank, hit) in lexical.iter().enumerate() {
		let lexical_rank = rank as u32 + 1;

		if let Some(existing) = fused.iter_mut().find(|h| h.chunk_id == hit.chunk_id) {
			existing.lexical_rank = Some(lexical_rank);
		} else {
			let mut hit = hit.clone();

			hit.dense_rank = None;
			hit.lexical_rank = Some(lexical_rank);

			fused.push(hit);
		}
	}

	for hit in &mut fused {
		hit.score = rrf_score(hit.dense_rank, hit.lexical_rank);
	}

	fused.sort_by(|a, b| {
		b.score
			.total_cmp(&a.score)
			.then_with(|| a.document_id.cmp(&b.document_id))
			.then_with(|| a.ordinal.cmp(&b.ordinal))
	});
	fused.truncate(k);

	fused
}

pub fn rrf_score(dense_rank: Option<u32>, lexical_rank: Option<u32>) -> f32 {
	let dense_term = dense_rank.map(|rank| 1.0 / (RRF_K + rank as f32)).unwrap_or(0.0);
	let lexical_term = lexical_rank.map(|rank| 1.0 / (RRF_K + rank as f32)).unwrap_or(0.0);
	let base = dense_term + lexical_term;

	if dense_rank.is_some() && lexical_rank.is_some() { base * OVERLAP_BONUS } else { base }
}
