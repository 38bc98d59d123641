//! Dinucleotide-preserving sequence shuffle

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `seq` while preserving its exact dinucleotide counts.
///
/// Builds the successor lists of every symbol, permutes all but the last
/// successor of each symbol, then walks the resulting Eulerian path from the
/// first base. Keeping the last edges fixed makes them an arborescence into
/// the final base, so the walk always consumes every edge. The first and last
/// bases are therefore unchanged.
pub fn dinuc_shuffle<R: Rng + ?Sized>(seq: &[u8], rng: &mut R) -> Vec<u8> {
    if seq.len() < 3 {
        return seq.to_vec();
    }

    let mut symbols = seq.to_vec();
    symbols.sort_unstable();
    symbols.dedup();
    let tokens: Vec<usize> = seq
        .iter()
        .map(|b| symbols.partition_point(|s| s < b))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); symbols.len()];
    for (i, &token) in tokens[..tokens.len() - 1].iter().enumerate() {
        successors[token].push(i + 1);
    }
    for list in successors.iter_mut() {
        if list.len() > 1 {
            let last = list.len() - 1;
            list[..last].shuffle(rng);
        }
    }

    let mut used = vec![0usize; symbols.len()];
    let mut shuffled = Vec::with_capacity(seq.len());
    let mut current = 0;
    shuffled.push(seq[current]);
    for _ in 1..seq.len() {
        let token = tokens[current];
        current = successors[token][used[token]];
        used[token] += 1;
        shuffled.push(seq[current]);
    }

    shuffled
}
