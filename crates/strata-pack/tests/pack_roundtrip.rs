//! End-to-end pack round-trips across the parse → resolve → rewrite path.

use std::collections::{HashMap, HashSet};

use strata_hash::ObjectId;
use strata_object::ObjectType;
use strata_pack::delta::compute_delta;
use strata_pack::{resolve, PackReader, PackWriter};

fn unpack(pack: &[u8]) -> Vec<(ObjectId, ObjectType, Vec<u8>)> {
    let reader = PackReader::new(pack).unwrap();
    let entries = reader.entries().unwrap();
    let resolution = resolve(&entries, &HashMap::new()).unwrap();
    assert!(resolution.is_complete());
    resolution
        .objects
        .into_iter()
        .map(|o| (o.id, o.obj_type, o.data))
        .collect()
}

#[test]
fn repack_preserves_object_set() {
    let mut writer = PackWriter::new(4);
    let base_off = writer.position();
    writer.add_object(ObjectType::Blob, b"shared prefix, first version").unwrap();
    writer
        .add_ofs_delta(
            base_off,
            &compute_delta(b"shared prefix, first version", b"shared prefix, second version"),
        )
        .unwrap();
    writer.add_object(ObjectType::Tree, b"").unwrap();
    writer
        .add_object(
            ObjectType::Commit,
            b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\nauthor A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nroot\n",
        )
        .unwrap();
    let (pack, _) = writer.finish().unwrap();

    let objects = unpack(&pack);
    assert_eq!(objects.len(), 4);

    // Re-pack everything as full objects and unpack again.
    let mut rewriter = PackWriter::new(objects.len() as u32);
    for (_, ty, data) in &objects {
        rewriter.add_object(*ty, data).unwrap();
    }
    let (repacked, _) = rewriter.finish().unwrap();

    let first: HashSet<ObjectId> = objects.iter().map(|(id, _, _)| *id).collect();
    let second: HashSet<ObjectId> = unpack(&repacked).iter().map(|(id, _, _)| *id).collect();
    assert_eq!(first, second);
}

#[test]
fn object_ids_are_content_addresses() {
    let mut writer = PackWriter::new(1);
    let written_id = writer.add_object(ObjectType::Blob, b"hello\n").unwrap();
    let (pack, _) = writer.finish().unwrap();

    let objects = unpack(&pack);
    assert_eq!(objects[0].0, written_id);
    assert_eq!(
        objects[0].0.to_hex(),
        "ce013625030ba8dba906f756967f9e9ca394464a"
    );
}

#[test]
fn duplicate_content_resolves_to_same_id() {
    let mut writer = PackWriter::new(2);
    writer.add_object(ObjectType::Blob, b"same bytes").unwrap();
    writer.add_object(ObjectType::Blob, b"same bytes").unwrap();
    let (pack, _) = writer.finish().unwrap();

    let objects = unpack(&pack);
    assert_eq!(objects[0].0, objects[1].0);
}
