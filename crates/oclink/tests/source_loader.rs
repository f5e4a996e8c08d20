//! Loading kernels from disk through the runtime facade.

use std::fs;
use std::sync::Arc;

use oclink::prelude::*;
use tempfile::TempDir;

fn kernel_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("include")).unwrap();
    fs::write(
        dir.path().join("include/common.h"),
        "#define WIDTH %WIDTH%\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("fill.cl"),
        "#include \"common.h\"\n__kernel void main_kernel(__global int* out, int value) {}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("broken.cl"),
        "#include \"missing.h\"\n__kernel void main_kernel() {}\n",
    )
    .unwrap();
    dir
}

fn runtime(dir: &TempDir, context: Arc<HostContext>) -> Oclink {
    let config = OclinkConfig {
        kernel_root: dir.path().to_path_buf(),
        ..Default::default()
    };
    Oclink::with_context(Backend::Cpu, context, config)
}

#[test]
fn test_kernel_loaded_with_includes_and_constants() {
    let dir = kernel_tree();
    let runtime = runtime(&dir, Arc::new(HostContext::new()));

    let kernel = runtime
        .kernel_with_constants("fill", "main_kernel", &[("WIDTH", "64")])
        .unwrap();
    assert!(kernel.source().contains("#define WIDTH 64"));
    assert!(!kernel.source().contains("#include"));
    assert!(kernel.is_compiled());
}

#[test]
fn test_missing_include_is_reported() {
    let dir = kernel_tree();
    let runtime = runtime(&dir, Arc::new(HostContext::new()));

    let err = runtime.kernel("broken").unwrap_err();
    match err {
        OclinkError::IncludeNotFound { include, searched } => {
            assert_eq!(include, "missing.h");
            assert_eq!(searched.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_loaded_kernel_runs() {
    let dir = kernel_tree();
    let context = Arc::new(HostContext::new());
    context.register_kernel("main_kernel", |inv| {
        let value: i32 = inv.value(1).expect("value must be bound by value");
        let len = inv.global.product();
        inv.write(0, &vec![value; len]).expect("out must be bound as memory");
    });
    let runtime = runtime(&dir, context);

    let out = runtime.buffer::<i32>("out", 8).with_access(AccessMode::WriteOnly);
    let value = DeviceValue::new("value", 7i32).with_scope(ArgScope::Private);
    let kernel = runtime
        .kernel_with_constants("fill", "main_kernel", &[("WIDTH", "8")])
        .unwrap()
        .with_argument(&out)
        .with_argument(&value)
        .with_global(NdRange::d1(8));

    let mut group = runtime.dispatch(kernel).unwrap();
    group.run(&[], None).unwrap();
    group.wait_for_group().unwrap();
    group.download_result(&out).unwrap();

    assert_eq!(out.to_vec(), vec![7; 8]);
}
