use std::{fs, fs::File, io::Write};

use flate2::write::GzEncoder;
use tempfile::tempdir;

use bowfin::{
    index::indexing,
    map::{mapping, AlignmentParameters, ReportMode},
};

const TEST_GENOME: &str = "\
>chr1
CCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGATACTTTACCGGCCGGCCGG
CCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGGCCGG
>Chromosome_02
AATTCCGGTTGATTACAAAGGCCAATTGGCCAATTGGCCAATTGGCCAATTGGCCAATTC
";

#[derive(Debug, PartialEq, Eq)]
struct SamLine {
    qname: String,
    flag: u16,
    rname: String,
    pos: u64,
    cigar: String,
    tags: Vec<String>,
}

fn parse_sam(path: &std::path::Path) -> Vec<SamLine> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.starts_with('@'))
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            SamLine {
                qname: fields[0].to_string(),
                flag: fields[1].parse().unwrap(),
                rname: fields[2].to_string(),
                pos: fields[3].parse().unwrap(),
                cigar: fields[5].to_string(),
                tags: fields[11..].iter().map(|tag| tag.to_string()).collect(),
            }
        })
        .collect()
}

fn nm_tag(line: &SamLine) -> Option<&str> {
    line.tags
        .iter()
        .find(|tag| tag.starts_with("NM:i:"))
        .map(|tag| &tag["NM:i:".len()..])
}

#[test]
fn integration_map_reads() {
    let temp_dir = tempdir().unwrap();
    let genome_path = temp_dir.path().join("genome.fa");
    let reads_path = temp_dir.path().join("reads.fq");
    let out_path = temp_dir.path().join("out.sam");

    fs::write(&genome_path, TEST_GENOME).unwrap();
    indexing::run(genome_path.to_str().unwrap()).unwrap();

    // An exact forward read, its reverse complement, a read with one
    // substitution, a multi-N read, and a cross-chromosome read
    let fastq_content = "\
@read_fwd
ATACTTTA
+
]]]]]]]]
@read_rev
TAAAGTAT
+
]]]]]]]]
@read_sub
ATACTTGA
+
]]]]]]]]
@read_ns
NNNNNTAC
+
]]]]]]]]
@read_chr2
GATTACAAAGGCCAAT
+
]]]]]]]]]]]]]]]]
";
    fs::write(&reads_path, fastq_content).unwrap();

    let parameters = AlignmentParameters {
        max_edit_distance: 2,
        report_mode: ReportMode::BestHit,
        ..Default::default()
    };
    mapping::run(
        reads_path.to_str().unwrap(),
        genome_path.to_str().unwrap(),
        out_path.to_str().unwrap(),
        false,
        &parameters,
    )
    .unwrap();

    let records = parse_sam(&out_path);
    assert_eq!(records.len(), 5);

    let fwd = records.iter().find(|r| r.qname == "read_fwd").unwrap();
    assert_eq!(fwd.flag, 0);
    assert_eq!(fwd.rname, "chr1");
    assert_eq!(fwd.pos, 41);
    assert_eq!(fwd.cigar, "8M");
    assert_eq!(nm_tag(fwd), Some("0"));

    let rev = records.iter().find(|r| r.qname == "read_rev").unwrap();
    assert_eq!(rev.flag, 16);
    assert_eq!(rev.rname, "chr1");
    assert_eq!(rev.pos, 41);
    assert_eq!(nm_tag(rev), Some("0"));

    let sub = records.iter().find(|r| r.qname == "read_sub").unwrap();
    assert_eq!(sub.flag & 4, 0, "read with one substitution must map");
    assert_eq!(sub.rname, "chr1");
    assert_eq!(sub.pos, 41);
    assert_eq!(nm_tag(sub), Some("1"));

    // More Ns than the edit budget: reported, but unmapped
    let ns = records.iter().find(|r| r.qname == "read_ns").unwrap();
    assert_eq!(ns.flag, 4);
    assert_eq!(ns.rname, "*");
    assert_eq!(ns.pos, 0);

    let chr2 = records.iter().find(|r| r.qname == "read_chr2").unwrap();
    assert_eq!(chr2.flag, 0);
    assert_eq!(chr2.rname, "Chromosome_02");
    assert_eq!(chr2.pos, 11);
    assert_eq!(nm_tag(chr2), Some("0"));
}

#[test]
fn integration_gzipped_input_matches_plain() {
    let temp_dir = tempdir().unwrap();
    let genome_path = temp_dir.path().join("genome.fa");
    fs::write(&genome_path, TEST_GENOME).unwrap();
    indexing::run(genome_path.to_str().unwrap()).unwrap();

    let fastq_content = "@read_fwd\nATACTTTA\n+\n]]]]]]]]\n";
    let plain_path = temp_dir.path().join("reads.fq");
    fs::write(&plain_path, fastq_content).unwrap();
    let gz_path = temp_dir.path().join("reads.fq.gz");
    {
        let mut encoder =
            GzEncoder::new(File::create(&gz_path).unwrap(), flate2::Compression::default());
        encoder.write_all(fastq_content.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    let parameters = AlignmentParameters::default();
    let plain_out = temp_dir.path().join("plain.sam");
    let gz_out = temp_dir.path().join("gz.sam");
    for (reads, out) in [(&plain_path, &plain_out), (&gz_path, &gz_out)] {
        mapping::run(
            reads.to_str().unwrap(),
            genome_path.to_str().unwrap(),
            out.to_str().unwrap(),
            false,
            &parameters,
        )
        .unwrap();
    }

    assert_eq!(parse_sam(&plain_out), parse_sam(&gz_out));
}

#[test]
fn integration_refuses_to_overwrite_output() {
    let temp_dir = tempdir().unwrap();
    let genome_path = temp_dir.path().join("genome.fa");
    fs::write(&genome_path, TEST_GENOME).unwrap();
    indexing::run(genome_path.to_str().unwrap()).unwrap();

    let reads_path = temp_dir.path().join("reads.fq");
    fs::write(&reads_path, "@r\nATACTTTA\n+\n]]]]]]]]\n").unwrap();
    let out_path = temp_dir.path().join("out.sam");
    fs::write(&out_path, "occupied").unwrap();

    let parameters = AlignmentParameters::default();
    let result = mapping::run(
        reads_path.to_str().unwrap(),
        genome_path.to_str().unwrap(),
        out_path.to_str().unwrap(),
        false,
        &parameters,
    );
    assert!(result.is_err());

    // With force_overwrite the run succeeds
    mapping::run(
        reads_path.to_str().unwrap(),
        genome_path.to_str().unwrap(),
        out_path.to_str().unwrap(),
        true,
        &parameters,
    )
    .unwrap();
}

#[test]
fn integration_index_files_are_byte_identical_across_builds() {
    let temp_dir = tempdir().unwrap();
    let first = temp_dir.path().join("a");
    let second = temp_dir.path().join("b");
    fs::create_dir_all(&first).unwrap();
    fs::create_dir_all(&second).unwrap();

    for dir in [&first, &second] {
        let genome_path = dir.join("genome.fa");
        fs::write(&genome_path, TEST_GENOME).unwrap();
        indexing::run(genome_path.to_str().unwrap()).unwrap();
    }

    for suffix in [".bfp", ".bfs", ".bfb", ".bfo", ".bfn"] {
        let bytes_a = fs::read(first.join(format!("genome.fa{suffix}"))).unwrap();
        let bytes_b = fs::read(second.join(format!("genome.fa{suffix}"))).unwrap();
        assert_eq!(bytes_a, bytes_b, "index file {suffix} differs across builds");
    }
}

#[test]
fn integration_missing_input_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let genome_path = temp_dir.path().join("genome.fa");
    fs::write(&genome_path, TEST_GENOME).unwrap();
    indexing::run(genome_path.to_str().unwrap()).unwrap();

    let parameters = AlignmentParameters::default();
    assert!(mapping::run(
        temp_dir.path().join("missing.fq").to_str().unwrap(),
        genome_path.to_str().unwrap(),
        temp_dir.path().join("out.sam").to_str().unwrap(),
        false,
        &parameters,
    )
    .is_err());
}
