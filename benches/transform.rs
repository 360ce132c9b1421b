use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pali_reader::transform::{Transformer, isolate_body, markup_spans, word_spans};

const PARAGRAPH: &str = "<p class=\"bodytext\">Evaṃ me sutaṃ – ekaṃ samayaṃ bhagavā antarā ca \
rājagahaṃ antarā ca nāḷandaṃ addhānamaggappaṭipanno hoti mahatā bhikkhusaṅghena saddhiṃ \
pañcamattehi bhikkhusatehi. [PTS Page 001] Suppiyopi kho paribbājako ‘Buddhassa’ avaṇṇaṃ \
bhāsati, 1 2 3.</p>\n";

fn sample_document(paragraphs: usize) -> String {
    let mut doc = String::from("<html><head><title>Dīgha Nikāya</title></head><body>\n");
    for _ in 0..paragraphs {
        doc.push_str(PARAGRAPH);
    }
    doc.push_str("</body></html>");
    doc
}

fn bench_render_document(c: &mut Criterion) {
    let transformer = Transformer::default();
    let mut group = c.benchmark_group("render_document");
    for &paragraphs in &[10usize, 100, 1_000] {
        let doc = sample_document(paragraphs);
        group.throughput(Throughput::Bytes(doc.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &doc, |b, doc| {
            b.iter(|| black_box(transformer.render_document(doc)));
        });
    }
    group.finish();
}

fn bench_segmentation(c: &mut Criterion) {
    let doc = sample_document(1_000);
    let body = isolate_body(&doc);
    c.bench_function("segment::markup_spans", |b| {
        b.iter(|| black_box(markup_spans(body).count()));
    });
    c.bench_function("segment::word_spans", |b| {
        b.iter(|| black_box(word_spans(body).count()));
    });
}

criterion_group!(benches, bench_render_document, bench_segmentation);
criterion_main!(benches);
