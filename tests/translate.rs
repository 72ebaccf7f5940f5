use ncfp::translate::{normalize_protein, strip_terminal_stop, translate};

// One codon per residue, standard code.
fn back_translate(protein: &str) -> String {
    protein
        .chars()
        .map(|residue| match residue {
            'A' => "GCT",
            'C' => "TGT",
            'D' => "GAT",
            'E' => "GAA",
            'F' => "TTT",
            'G' => "GGT",
            'H' => "CAT",
            'I' => "ATT",
            'K' => "AAA",
            'L' => "CTG",
            'M' => "ATG",
            'N' => "AAT",
            'P' => "CCG",
            'Q' => "CAG",
            'R' => "CGT",
            'S' => "AGC",
            'T' => "ACC",
            'V' => "GTG",
            'W' => "TGG",
            'Y' => "TAT",
            _ => "TAA",
        })
        .collect()
}

#[test]
fn back_translation_round_trips() {
    let protein = "MACDEFGHIKLNPQRSTVWY";
    let cds = format!("{}TAG", back_translate(protein));
    let translated = translate(cds.as_bytes(), false);
    assert_eq!(strip_terminal_stop(&translated), protein);
    assert_eq!(
        normalize_protein(strip_terminal_stop(&translated)),
        normalize_protein("macdefghik-lnpqrstvwy")
    );
}

#[test]
fn leading_alternative_start_reads_as_methionine() {
    let cds = format!("TTG{}TGA", back_translate("KV"));
    assert_eq!(translate(cds.as_bytes(), false), "LKV*");
    assert_eq!(translate(cds.as_bytes(), true), "MKV*");
}
