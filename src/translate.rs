// Standard genetic code, indexed by 16 * first + 4 * second + third base
// with T=0, C=1, A=2, G=3. Table 11 shares these amino acids.
const AMINO_ACIDS: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

// Initiator codons of the bacterial, archaeal and plant plastid code (table 11).
const ALTERNATIVE_STARTS: [&[u8; 3]; 7] = [b"TTG", b"CTG", b"ATT", b"ATC", b"ATA", b"ATG", b"GTG"];

pub const STOP: u8 = b'*';

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

pub fn translate_codon(codon: &[u8]) -> u8 {
    if codon.len() != 3 {
        return b'X';
    }
    match (
        base_index(codon[0]),
        base_index(codon[1]),
        base_index(codon[2]),
    ) {
        (Some(a), Some(b), Some(c)) => AMINO_ACIDS[16 * a + 4 * b + c],
        _ => b'X',
    }
}

pub fn is_alternative_start(codon: &[u8]) -> bool {
    let normalized = codon
        .iter()
        .map(|base| match base.to_ascii_uppercase() {
            b'U' => b'T',
            other => other,
        })
        .collect::<Vec<_>>();
    ALTERNATIVE_STARTS
        .iter()
        .any(|start| start.as_slice() == normalized.as_slice())
}

/// Conceptual translation of `nucleotides`, ignoring a trailing partial codon.
///
/// With `alternative_start`, a first codon from the table 11 initiator set is
/// read as methionine; otherwise it translates as an ordinary codon.
pub fn translate(nucleotides: &[u8], alternative_start: bool) -> String {
    let mut protein = String::with_capacity(nucleotides.len() / 3);
    for (idx, codon) in nucleotides.chunks_exact(3).enumerate() {
        if idx == 0 && alternative_start && is_alternative_start(codon) {
            protein.push('M');
        } else {
            protein.push(char::from(translate_codon(codon)));
        }
    }
    protein
}

pub fn strip_terminal_stop(protein: &str) -> &str {
    protein.strip_suffix(char::from(STOP)).unwrap_or(protein)
}

/// Upper-cased residues with alignment gaps and whitespace removed.
pub fn normalize_protein(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|ch| !matches!(ch, '-' | '.') && !ch.is_whitespace())
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}
