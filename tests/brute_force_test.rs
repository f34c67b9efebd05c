use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vicinity::error::ErrorKind;
use vicinity::prelude::*;

fn random_data(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows * dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

#[test]
fn test_matches_full_sort() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dim = 5;
    let rows = 300;
    let data = random_data(rows, dim, 31);
    let mut index = BruteForceIndex::new(DistanceMetric::Euclidean, dim)?;
    index.init(rows)?;
    index.add_items(&VectorBatch::new(&data, dim)?, None, 1)?;

    let queries = random_data(10, dim, 32);
    let results = index.search_knn(&VectorBatch::new(&queries, dim)?, 15, 4)?;

    for (q, hits) in queries.chunks_exact(dim).zip(&results) {
        let mut all: Vec<(f32, u64)> = data
            .chunks_exact(dim)
            .enumerate()
            .map(|(i, v)| (DistanceMetric::Euclidean.distance(q, v), i as u64))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let expected: Vec<u64> = all[..15].iter().map(|&(_, label)| label).collect();
        let actual: Vec<u64> = hits.iter().map(|h| h.label).collect();
        assert_eq!(actual, expected);
    }
    Ok(())
}

#[test]
fn test_inner_product_self_query() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dim = 4;
    let data = [1.0, 0.0, 0.0, 0.0, 0.0, 0.6, 0.8, 0.0];
    let mut index = BruteForceIndex::new(DistanceMetric::InnerProduct, dim)?;
    index.init(2)?;
    index.add_items(&VectorBatch::new(&data, dim)?, Some(&[1, 2]), 1)?;

    let hits = index.search_knn(&VectorBatch::new(&data, dim)?, 2, 1)?;
    assert_eq!(hits[0][0].label, 1);
    assert_eq!(hits[1][0].label, 2);
    assert!(hits[1][0].distance.abs() < 1e-6);
    assert!((hits[1][1].distance - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_capacity_and_overwrite() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut index = BruteForceIndex::new(DistanceMetric::Euclidean, 2)?;
    index.init(3)?;
    let data = [0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
    index.add_items(&VectorBatch::new(&data, 2)?, None, 1)?;

    let err = index
        .add_items(&VectorBatch::single(&[3.0, 3.0])?, None, 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

    index.add_items(&VectorBatch::single(&[5.0, 5.0])?, Some(&[0]), 1)?;
    assert_eq!(index.current_count(), 3);
    let hits = index.search_knn(&VectorBatch::single(&[5.0, 5.0])?, 1, 1)?;
    assert_eq!(hits[0][0].label, 0);

    let err = index
        .search_knn(&VectorBatch::single(&[0.0, 0.0])?, 4, 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientResults);
    Ok(())
}
