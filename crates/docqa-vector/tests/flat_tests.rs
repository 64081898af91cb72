use docqa_core::error::Error;
use docqa_vector::FlatIndex;

fn grid() -> FlatIndex {
    FlatIndex::rebuild(&[
        vec![0.0, 0.0],  // 0
        vec![3.0, 4.0],  // 1, distance 5 from origin
        vec![1.0, 0.0],  // 2, distance 1
        vec![0.0, 1.0],  // 3, distance 1 (tie with 2)
        vec![-6.0, 8.0], // 4, distance 10
    ])
    .expect("rebuild")
}

#[test]
fn returns_true_top_k_nearest_first() {
    let hits = grid().search(&[0.0, 0.0], 3).expect("search");
    let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();

    assert_eq!(rows, vec![0, 2, 3]);
    assert_eq!(hits[0].distance, 0.0);
    assert!((hits[1].distance - 1.0).abs() < 1e-6);
}

#[test]
fn ties_go_to_the_lowest_row() {
    let index = FlatIndex::rebuild(&[vec![2.0], vec![0.0], vec![2.0], vec![0.0]]).expect("rebuild");
    let rows: Vec<usize> = index.search(&[1.0], 4).expect("search").iter().map(|h| h.row).collect();
    assert_eq!(rows, vec![0, 1, 2, 3]);

    let top2: Vec<usize> = index.search(&[1.0], 2).expect("search").iter().map(|h| h.row).collect();
    assert_eq!(top2, vec![0, 1]);
}

#[test]
fn k_larger_than_corpus_returns_every_row_once() {
    let hits = grid().search(&[3.0, 4.0], 50).expect("search");
    let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();

    assert_eq!(hits.len(), 5, "no padding beyond the row count");
    assert_eq!(rows, vec![1, 3, 2, 0, 4]);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn empty_index_returns_nothing() {
    assert!(FlatIndex::new().search(&[1.0, 2.0, 3.0], 3).expect("search").is_empty());
    assert!(FlatIndex::with_dim(3).search(&[1.0, 2.0, 3.0], 3).expect("search").is_empty());
    assert!(grid().search(&[0.0, 0.0], 0).expect("search").is_empty());
}

#[test]
fn mismatched_batch_is_rejected_without_partial_append() {
    let mut index = grid();
    let err = index.add(&[vec![1.0, 1.0], vec![1.0, 1.0, 1.0]]).unwrap_err();

    assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 3 }));
    assert_eq!(index.len(), 5);
}

#[test]
fn dimension_is_fixed_by_the_first_batch() {
    let mut index = FlatIndex::new();
    index.add(&[vec![1.0, 2.0, 3.0]]).expect("first batch");
    index.add(&[vec![4.0, 5.0, 6.0]]).expect("same dim");

    assert_eq!(index.dim(), Some(3));
    assert!(matches!(index.add(&[vec![1.0]]), Err(Error::DimensionMismatch { expected: 3, got: 1 })));
    assert!(matches!(index.search(&[1.0], 1), Err(Error::DimensionMismatch { .. })));

    let mut fixed = FlatIndex::with_dim(2);
    assert!(fixed.add(&[vec![1.0, 2.0, 3.0]]).is_err());
}

#[test]
fn rows_keep_insertion_order_across_batches() {
    let mut index = FlatIndex::new();
    index.add(&[vec![1.0], vec![2.0]]).expect("batch 1");
    index.add(&[vec![3.0]]).expect("batch 2");

    assert_eq!(index.row(0), Some(&[1.0][..]));
    assert_eq!(index.row(2), Some(&[3.0][..]));
    let hits = index.search(&[3.0], 1).expect("search");
    assert_eq!(hits[0].row, 2);
}
