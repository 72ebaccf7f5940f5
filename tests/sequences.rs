mod common;

use std::collections::HashMap;

use bio::io::fasta;

use common::MockUniprot;
use ncfp::cache::{Cache, Table};
use ncfp::domain::{InputFormat, QueryTerm, Region, ResolutionStatus};
use ncfp::sequences::{QueryResolver, ResolverOptions};
use ncfp::uniprot::{UniprotClient, UniprotCrossRefs};

fn options(format: InputFormat) -> ResolverOptions {
    ResolverOptions {
        format,
        stockholm: false,
        uniprot_xref: false,
        max_retries: 3,
    }
}

fn protein(id: &str, desc: Option<&str>) -> fasta::Record {
    fasta::Record::with_attrs(id, desc, b"MKV")
}

#[test]
fn ncbi_ids_become_protein_queries() {
    let cache = Cache::in_memory().unwrap();
    let resolver = QueryResolver::new(&cache, None, options(InputFormat::Ncbi));
    let records = vec![
        protein("WP_000001.1", Some("hypothetical protein")),
        protein("AAC73112.1", None),
    ];
    let resolution = resolver.resolve_all(&records).unwrap();
    assert_eq!(resolution.with_query(), 2);
    assert_eq!(
        resolution.states[0].query,
        Some(QueryTerm::Protein("WP_000001.1".to_string()))
    );
    assert_eq!(resolution.states[1].status, ResolutionStatus::QueryAssigned);
    assert_eq!(cache.get_aa_query("AAC73112.1").unwrap().as_deref(), Some("AAC73112.1"));
}

#[test]
fn resolving_twice_reuses_stored_queries() {
    let cache = Cache::in_memory().unwrap();
    let records = vec![protein(
        "tr|Q1|Q1_ECOLI",
        Some("Leader peptide OS=Escherichia coli OX=562 GN=thrL PE=1 SV=1"),
    )];

    let resolver = QueryResolver::new(&cache, None, options(InputFormat::Uniprot));
    let first = resolver.resolve_all(&records).unwrap();
    assert_eq!(first.reused, 0);
    let second = resolver.resolve_all(&records).unwrap();
    assert_eq!(second.reused, 1);
    assert_eq!(first.states[0].query, second.states[0].query);
    assert_eq!(
        second.states[0].query,
        Some(QueryTerm::Nucleotide("thrL".to_string()))
    );
    assert_eq!(cache.count(Table::Sequences).unwrap(), 1);
}

#[test]
fn uniprot_record_without_gene_name_is_skipped() {
    let cache = Cache::in_memory().unwrap();
    let resolver = QueryResolver::new(&cache, None, options(InputFormat::Uniprot));
    let records = vec![
        protein("tr|Q1|Q1_ECOLI", Some("Protein OS=Escherichia coli OX=562 PE=4 SV=1")),
        protein("tr|Q2|Q2_ECOLI", Some("Protein OS=Escherichia coli GN=yaaA PE=4 SV=1")),
    ];
    let resolution = resolver.resolve_all(&records).unwrap();
    assert_eq!(resolution.skipped().collect::<Vec<_>>(), vec![0]);
    assert_eq!(resolution.states[0].status, ResolutionStatus::Unresolved);
    assert!(!cache.has_query("tr|Q1|Q1_ECOLI").unwrap());
    assert_eq!(cache.count(Table::Sequences).unwrap(), 2);
}

#[test]
fn cross_references_take_precedence_over_gene_name() {
    let cache = Cache::in_memory().unwrap();
    let uniprot = MockUniprot {
        entries: HashMap::from([(
            "Q1".to_string(),
            UniprotCrossRefs {
                embl_protein_ids: vec!["AAC73112.1".to_string()],
                refseq_protein_ids: vec!["NP_414542.1".to_string()],
            },
        )]),
        ..MockUniprot::default()
    };
    let mut opts = options(InputFormat::Uniprot);
    opts.uniprot_xref = true;
    let resolver = QueryResolver::new(&cache, Some(&uniprot as &dyn UniprotClient), opts);
    let records = vec![
        protein("tr|Q1|Q1_ECOLI", Some("Protein GN=thrL")),
        protein("tr|Q9|Q9_ECOLI", Some("Protein GN=yaaA")),
    ];

    let resolution = resolver.resolve_all(&records).unwrap();
    assert_eq!(
        resolution.states[0].query,
        Some(QueryTerm::Protein("AAC73112.1".to_string()))
    );
    assert_eq!(
        cache.get_xref_queries("tr|Q1|Q1_ECOLI").unwrap(),
        vec!["NP_414542.1"]
    );
    assert_eq!(
        resolution.states[1].query,
        Some(QueryTerm::Nucleotide("yaaA".to_string()))
    );
    // The 404 for Q9 is a client error and is not retried.
    assert_eq!(*uniprot.calls.lock().unwrap(), 2);

    resolver.resolve_all(&records).unwrap();
    assert_eq!(*uniprot.calls.lock().unwrap(), 2);
}

#[test]
fn unreachable_uniprot_falls_back_to_gene_name_or_skips() {
    let cache = Cache::in_memory().unwrap();
    let uniprot = MockUniprot {
        unreachable: true,
        ..MockUniprot::default()
    };
    let mut opts = options(InputFormat::Uniprot);
    opts.uniprot_xref = true;
    let resolver = QueryResolver::new(&cache, Some(&uniprot as &dyn UniprotClient), opts);
    let records = vec![
        protein("tr|Q1|Q1_ECOLI", Some("Protein OS=Escherichia coli GN=thrL PE=1 SV=1")),
        protein("tr|Q2|Q2_ECOLI", Some("Protein OS=Escherichia coli PE=4 SV=1")),
    ];

    let resolution = resolver.resolve_all(&records).unwrap();
    assert_eq!(*uniprot.calls.lock().unwrap(), 6);
    assert_eq!(
        resolution.states[0].query,
        Some(QueryTerm::Nucleotide("thrL".to_string()))
    );
    assert_eq!(resolution.states[1].query, None);
    assert_eq!(resolution.states[1].status, ResolutionStatus::Unresolved);
    assert_eq!(resolution.skipped().collect::<Vec<_>>(), vec![1]);
    assert!(!cache.has_query("tr|Q2|Q2_ECOLI").unwrap());
    assert!(cache.get_xref_queries("tr|Q1|Q1_ECOLI").unwrap().is_empty());
}

#[test]
fn region_suffix_is_split_from_the_query() {
    let cache = Cache::in_memory().unwrap();
    let mut opts = options(InputFormat::Ncbi);
    opts.stockholm = true;
    let resolver = QueryResolver::new(&cache, None, opts);
    let resolution = resolver
        .resolve_all(&[protein("WP_000001.1/2-40", None)])
        .unwrap();
    let state = &resolution.states[0];
    assert_eq!(state.record_id, "WP_000001.1/2-40");
    assert_eq!(state.header_id, "WP_000001.1");
    assert_eq!(state.region, Some(Region { start: 2, end: 40 }));
    assert_eq!(
        cache.get_aa_query("WP_000001.1/2-40").unwrap().as_deref(),
        Some("WP_000001.1")
    );
}
