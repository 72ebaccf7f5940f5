pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod download;
pub mod entrez;
pub mod error;
pub mod extract;
pub mod fasta;
pub mod retry;
pub mod sequences;
pub mod translate;
pub mod uniprot;
