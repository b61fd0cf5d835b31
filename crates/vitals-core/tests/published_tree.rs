//! End-to-end tests of the published tree: a source hierarchy mirrored
//! into a [`MemoryHost`] and driven through path lookup, file reads, and
//! value-file writes, the way a userspace reader would.

use std::sync::Arc;

use vitals_core::{
    AggrKind, Error, MemoryHost, MountOptions, Source, StatSlab, StatsMount, ValueDesc,
    ValueSchema, ValueType,
};

const OFF_U64: usize = 0;
const OFF_S32: usize = 8;
const SLAB_LEN: usize = 16;

fn stats_schema() -> Arc<ValueSchema> {
    ValueSchema::new(vec![
        ValueDesc::new("exits", OFF_U64, ValueType::U64).desc("Number of exits"),
        ValueDesc::new("lowest", OFF_S32, ValueType::S32)
            .aggr(AggrKind::Min)
            .desc("Lowest observed"),
    ])
}

fn slab(exits: u64, lowest: i32) -> Arc<StatSlab> {
    let slab = StatSlab::new(SLAB_LEN);
    slab.store_u64(OFF_U64, exits);
    slab.store_i32(OFF_S32, lowest);
    slab
}

fn mounted_pair() -> (Arc<MemoryHost>, StatsMount, Arc<Source>, Arc<Source>) {
    let host = MemoryHost::new();
    let mount = StatsMount::new(host.clone());

    let root = Source::new("kvm", "subsystem");
    root.add_values(&stats_schema(), None).unwrap();

    let vm = Source::new("vm_7", "vm");
    vm.add_values(&stats_schema(), Some(&slab(64, i32::MIN)))
        .unwrap();
    root.add_subordinate(&vm).unwrap();

    mount.register(&root).unwrap();
    (host, mount, root, vm)
}

#[test]
fn test_register_materialises_directories_and_files() {
    let (host, _mount, _root, _vm) = mounted_pair();

    assert!(host.exists("kvm"));
    assert!(host.exists("kvm/.schema"));
    assert!(host.exists("kvm/exits"));
    assert!(host.exists("kvm/lowest"));
    assert!(host.exists("kvm/vm_7/.schema"));
    assert!(host.exists("kvm/vm_7/exits"));
    assert_eq!(host.mode_of("kvm/.schema"), Some(0o444));
    assert_eq!(host.mode_of("kvm/exits"), Some(0o644));
}

#[test]
fn test_value_files_render_decimal_lines() {
    let (host, _mount, _root, _vm) = mounted_pair();

    assert_eq!(host.read_to_string("kvm/vm_7/exits").unwrap(), "64\n");
    assert_eq!(
        host.read_to_string("kvm/vm_7/lowest").unwrap(),
        "-2147483648\n"
    );
    // The root's aggregate sees the child's contribution.
    assert_eq!(host.read_to_string("kvm/lowest").unwrap(), "-2147483648\n");
}

#[test]
fn test_binding_after_register_creates_files() {
    let host = MemoryHost::new();
    let mount = StatsMount::new(host.clone());
    let root = Source::new("net", "subsystem");
    mount.register(&root).unwrap();
    assert!(!host.exists("net/exits"));

    root.add_values(&stats_schema(), Some(&slab(3, -1))).unwrap();
    assert_eq!(host.read_to_string("net/exits").unwrap(), "3\n");
}

#[test]
fn test_subordinate_after_register_publishes_subtree() {
    let (host, _mount, root, _vm) = mounted_pair();

    let late = Source::new("vm_9", "vm");
    let grand = Source::new("vcpu_0", "vcpu");
    late.add_subordinate(&grand).unwrap();
    root.add_subordinate(&late).unwrap();

    assert!(host.exists("kvm/vm_9/.schema"));
    assert!(host.exists("kvm/vm_9/vcpu_0/.schema"));
}

#[test]
fn test_schema_file_contents() {
    let (host, _mount, _root, _vm) = mounted_pair();

    let schema = host.read_to_string("kvm/vm_7/.schema").unwrap();
    assert_eq!(
        schema,
        "LABEL\n\
         vm vm_7\n\
         subsystem kvm\n\
         \n\
         METRIC\nNAME exits\nFLAG CUMULATIVE\nTYPE INT\nDESC Number of exits\n\n\
         METRIC\nNAME lowest\nFLAG CUMULATIVE\nTYPE INT\nDESC Lowest observed\n\n"
    );
}

#[test]
fn test_write_zero_clears_value() {
    let (host, _mount, _root, _vm) = mounted_pair();

    host.write("kvm/vm_7/exits", b"0\n").unwrap();
    assert_eq!(host.read_to_string("kvm/vm_7/exits").unwrap(), "0\n");
}

#[test]
fn test_write_rejects_non_zero_payloads() {
    let (host, _mount, _root, _vm) = mounted_pair();

    for payload in [&b"1\n"[..], &b"zero"[..], &b"0x0"[..], &b""[..]] {
        let err = host.write("kvm/vm_7/exits", payload).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{payload:?}");
    }
    assert_eq!(host.read_to_string("kvm/vm_7/exits").unwrap(), "64\n");
}

#[test]
fn test_write_to_read_only_value_rejected() {
    let host = MemoryHost::new();
    let mount = StatsMount::new(host.clone());
    let schema = ValueSchema::new(vec![
        ValueDesc::new("sealed", 0, ValueType::U64).mode(0o444)
    ]);
    let src = Source::new("node", "dir");
    src.add_values(&schema, Some(&StatSlab::new(8))).unwrap();
    mount.register(&src).unwrap();

    let err = host.write("node/sealed", b"0").unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    // Schema files never accept writes.
    let err = host.write("node/.schema", b"0").unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_remove_subordinate_tears_down_files() {
    let (host, _mount, root, vm) = mounted_pair();

    assert!(root.remove_subordinate(&vm));
    assert!(!host.exists("kvm/vm_7"));
    assert!(host.exists("kvm"));
    // The detached child can be published again later.
    assert!(!vm.is_published());
    root.add_subordinate(&vm).unwrap();
    assert_eq!(host.read_to_string("kvm/vm_7/exits").unwrap(), "64\n");
}

#[test]
fn test_drop_of_last_reference_removes_files() {
    let (host, _mount, root, vm) = mounted_pair();

    drop(root);
    // The child is still strongly held here, but its files went with the
    // parent's teardown.
    assert!(!host.exists("kvm"));
    assert!(!vm.is_published());
    assert_eq!(vm.get_value_by_name("exits").unwrap(), 64);
}

#[test]
fn test_open_races_drop_cleanly() {
    let host = MemoryHost::new();
    let mount = StatsMount::new(host.clone());
    let src = Source::new("ephemeral", "dir");
    src.add_values(&stats_schema(), Some(&slab(5, 5))).unwrap();
    mount.register(&src).unwrap();

    // Hold an open file across the drop of the last strong reference.
    let mut open = host.open("ephemeral/exits").unwrap();
    drop(src);
    // The open keeps the source alive for its own lifetime.
    assert_eq!(open.read().unwrap(), b"5\n".to_vec());
}

#[test]
fn test_mount_options_flow_through_host() {
    let options = MountOptions::parse("uid=1000,gid=50,mode=755").unwrap();
    let host = MemoryHost::with_options(options);
    assert_eq!(host.options().uid, 1000);
    assert_eq!(host.options().gid, 50);
    assert_eq!(host.options().mode, 0o755);
}

#[test]
fn test_concurrent_readers_and_tree_mutation() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (_host, _mount, root, _vm) = mounted_pair();
    let schema = stats_schema();

    let reader = {
        let root = Arc::clone(&root);
        std::thread::spawn(move || {
            for _ in 0..1_000 {
                // Either NotFound is impossible here; the value itself
                // varies as children come and go.
                let _ = root.get_value_by_name("lowest").unwrap();
            }
        })
    };

    for i in 0..50 {
        let child = Source::new(format!("vm_extra_{i}"), "vm");
        child.add_values(&schema, Some(&slab(i, 0))).unwrap();
        root.add_subordinate(&child).unwrap();
        root.remove_subordinate(&child);
    }
    reader.join().unwrap();
}
