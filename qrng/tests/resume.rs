use qrng::batch::{self, RunCheckpoint};
use qrng::error::SubmitError;
use qrng::{Error, Store, TxReceipt, TxStatus, WriteMode};
use serde_json::{json, Value};
use std::cell::RefCell;
use web3::types::{Address, H256};

fn confirmed(n: u64) -> TxReceipt {
    TxReceipt {
        hash: H256::from_low_u64_be(n),
        status: TxStatus::Confirmed,
        block_number: Some(n),
        contract_address: None,
        logs: Vec::new(),
    }
}

fn addresses(n: u64) -> Vec<Address> {
    (1..=n).map(Address::from_low_u64_be).collect()
}

#[tokio::test]
async fn interrupted_run_resumes_without_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let list = addresses(4);
    let submitted = RefCell::new(Vec::new());

    // first run dies on the third address
    let failure = batch::run(
        &list,
        store.checkpoint("done.json"),
        |a| {
            submitted.borrow_mut().push(a);
            let outcome = if a == Address::from_low_u64_be(3) {
                Err(Error::Submit(SubmitError::InsufficientFunds("out of gas money".into())))
            } else {
                Ok(confirmed(submitted.borrow().len() as u64))
            };
            async move { outcome }
        },
        |c| store.save_checkpoint("done.json", c),
    )
    .await
    .unwrap_err();
    assert_eq!(failure.address, Address::from_low_u64_be(3));
    assert_eq!(store.checkpoint("done.json"), RunCheckpoint::from_addresses(addresses(2)));

    // second run picks up where the file says
    submitted.borrow_mut().clear();
    let (checkpoint, summary) = batch::run(
        &list,
        store.checkpoint("done.json"),
        |a| {
            submitted.borrow_mut().push(a);
            async move { Ok(confirmed(a.to_low_u64_be())) }
        },
        |c| store.save_checkpoint("done.json", c),
    )
    .await
    .unwrap();
    assert_eq!(*submitted.borrow(), vec![Address::from_low_u64_be(3), Address::from_low_u64_be(4)]);
    assert_eq!(summary.skipped, 2);
    assert_eq!(checkpoint.len(), 4);

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("done.json")).unwrap()).unwrap();
    assert_eq!(raw["addresses"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn unreadable_checkpoint_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("done.json"), "not json at all").unwrap();
    let store = Store::new(dir.path());
    let checkpoint = store.checkpoint("done.json");
    assert!(checkpoint.is_empty());

    let (checkpoint, summary) = batch::run(
        &addresses(2),
        checkpoint,
        |a| async move { Ok(confirmed(a.to_low_u64_be())) },
        |c| store.save_checkpoint("done.json", c),
    )
    .await
    .unwrap();
    assert_eq!(summary.submitted, 2);
    assert_eq!(store.checkpoint("done.json"), checkpoint);
}

#[test]
fn checkpoint_document_matches_script_format() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let doc = json!({ "addresses": ["0x00000000000000000000000000000000000000aa", "garbage"] });
    store
        .write("done.json", doc.as_object().cloned().unwrap(), WriteMode::Replace)
        .unwrap();
    let checkpoint = store.checkpoint("done.json");
    assert_eq!(checkpoint.len(), 1);
    assert!(checkpoint.contains(&Address::from_low_u64_be(0xaa)));
}
