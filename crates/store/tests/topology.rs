#![forbid(unsafe_code)]

use lumen_core::{ClientError, Cluster, ClusterNode, NodeIds, Partition};
use lumen_store::TopologyCell;

fn cluster() -> Cluster {
    Cluster {
        nodes: vec![
            ClusterNode { id: 1, uri: "http://n1:8080".into(), is_available: true },
            ClusterNode { id: 2, uri: "http://n2:8080".into(), is_available: true },
        ],
        storage_partitions: vec![Partition { id: 0, node_ids: NodeIds::from_slice(&[1]) }],
        ingest_partitions: vec![],
    }
}

#[tokio::test]
async fn update_swaps_and_bumps_epoch() {
    let cell = TopologyCell::new(cluster());
    let mut rx = cell.subscribe_epoch();
    let next = cell
        .update(|c| {
            let mut n = c.clone();
            n.storage_partitions[0].node_ids = NodeIds::from_slice(&[2]);
            Ok(n)
        })
        .await
        .unwrap();
    assert_eq!(next.storage_partitions[0].node_ids.as_slice(), &[2]);
    assert_eq!(cell.current().storage_partitions[0].node_ids.as_slice(), &[2]);
    assert_eq!(cell.epoch(), 1);
    assert!(rx.has_changed().unwrap());
}

#[tokio::test]
async fn failed_update_keeps_current() {
    let cell = TopologyCell::new(cluster());
    let before = cell.current();
    let res = cell.update(|_| Err(ClientError::Precondition("unknown node".into()))).await;
    assert!(res.is_err());
    assert_eq!(*cell.current(), *before);
    assert_eq!(cell.epoch(), 0);
}
