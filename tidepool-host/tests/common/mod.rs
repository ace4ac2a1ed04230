//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tidepool_core::BindingConfig;
use tidepool_host::{MemorySink, ModuleBinding, WasmRuntime, WasmRuntimeConfig};

/// A small store module speaking the full protocol.
///
/// - `alloc` is a bump allocator starting at 1024 that grows memory on demand
/// - the descriptor globals point at words holding 24 and 12
/// - `convert` builds a tuple with capacity 4 and length 3, elements
///   `(10, 1, 2)`, `(20, 3, 4)`, `(30, 5, 6)`
/// - every store entry point except `convert` reports the uninitialized
///   condition until `init` has run
/// - `convertReporting` and `accumulateReporting` return a fresh allocation
///   and also report the serialization-failed condition
/// - `shout` writes invalid UTF-8 through `console.log`
pub const STORE_MODULE: &str = r#"
(module
    (import "ctx" "resolve" (func $resolve (param i32 i32)))
    (import "console" "log" (func $console (param i32 i32)))

    (memory (export "memory") 1)

    (global $heap (mut i32) (i32.const 1024))
    (global $ready (mut i32) (i32.const 0))
    (global $freed (mut i32) (i32.const 0))
    (global (export "BYTE_LENGTH_HISTOGRAM") i32 (i32.const 16))
    (global (export "BYTE_LENGTH_RECOMMENDATION") i32 (i32.const 20))

    (data (i32.const 16) "\18\00\00\00\0c\00\00\00")
    (data (i32.const 32) "hello")
    (data (i32.const 40) "\00\01\02\03")
    (data (i32.const 48) "{\"games\":[]}")
    (data (i32.const 120) "ok\ff\fe")
    (data (i32.const 64)
        "\0a\00\00\00\01\00\00\00\02\00\00\00"
        "\14\00\00\00\03\00\00\00\04\00\00\00"
        "\1e\00\00\00\05\00\00\00\06\00\00\00")

    (func $alloc (export "alloc") (param $size i32) (result i32)
        (local $ptr i32)
        (local $end i32)
        (local.set $ptr (global.get $heap))
        (local.set $end
            (i32.and
                (i32.add (i32.add (local.get $ptr) (local.get $size)) (i32.const 3))
                (i32.const -4)))
        (block $fits
            (br_if $fits
                (i32.le_u (local.get $end) (i32.mul (memory.size) (i32.const 65536))))
            (drop (memory.grow
                (i32.add
                    (i32.div_u
                        (i32.sub (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
                        (i32.const 65536))
                    (i32.const 1)))))
        (global.set $heap (local.get $end))
        (local.get $ptr))

    (func (export "dealloc") (param $ptr i32) (param $size i32)
        (global.set $freed (i32.add (global.get $freed) (local.get $size))))

    (func $emit_log (param $ptr i32) (param $len i32)
        (i32.store (i32.const 128) (i32.const 1))
        (i32.store (i32.const 132) (local.get $ptr))
        (i32.store (i32.const 136) (local.get $len))
        (call $resolve (i32.const 128) (i32.const 12)))

    (func $emit_response (param $sub i32) (param $ptr i32) (param $len i32)
        (i32.store (i32.const 128) (i32.const 2))
        (i32.store (i32.const 132) (local.get $sub))
        (i32.store (i32.const 136) (local.get $ptr))
        (i32.store (i32.const 140) (local.get $len))
        (call $resolve (i32.const 128) (i32.const 16)))

    (func $emit_condition (param $sub i32)
        (i32.store (i32.const 128) (i32.const 2))
        (i32.store (i32.const 132) (local.get $sub))
        (call $resolve (i32.const 128) (i32.const 8)))

    (func $require_ready (result i32)
        (if (i32.eqz (global.get $ready))
            (then
                (call $emit_condition (i32.const 2))
                (return (i32.const 0))))
        (i32.const 1))

    (func (export "init") (param $slice i32)
        (if (i32.ne (i32.load (local.get $slice)) (i32.add (local.get $slice) (i32.const 8)))
            (then unreachable))
        (global.set $ready (i32.const 1)))

    (func (export "persist")
        (if (call $require_ready)
            (then (call $emit_response (i32.const 1) (i32.const 40) (i32.const 4)))))

    (func (export "updateGames") (param $slice i32)
        (if (call $require_ready)
            (then
                (call $emit_log
                    (i32.load (local.get $slice))
                    (i32.load offset=4 (local.get $slice))))))

    (func (export "updateUsers") (param $slice i32)
        (if (call $require_ready)
            (then
                (if (i32.eqz (i32.load offset=4 (local.get $slice)))
                    (then (call $emit_condition (i32.const 3)))))))

    (func (export "filterGames") (param $query i32) (param $filters i32)
        (if (i32.eqz (call $require_ready)) (then (return)))
        (if (i32.ne
                (i32.load offset=8 (local.get $query))
                (i32.add (local.get $query) (i32.const 16)))
            (then unreachable))
        (if (i32.ne
                (i32.load (local.get $filters))
                (i32.add (local.get $filters) (i32.const 8)))
            (then unreachable))
        (drop (i32.load (i32.load offset=8 (local.get $query))))
        (i32.store8 (i32.const 112)
            (i32.add (i32.const 48) (i32.load offset=12 (local.get $query))))
        (i32.store8 (i32.const 113)
            (i32.add (i32.const 48) (i32.load offset=4 (local.get $filters))))
        (call $emit_response (i32.const 0) (i32.const 112) (i32.const 2))
        (call $emit_log (i32.const 32) (i32.const 5)))

    (func (export "getFullJson")
        (if (call $require_ready)
            (then (call $emit_response (i32.const 0) (i32.const 48) (i32.const 12)))))

    (func (export "getFullJsonSlice") (result i32)
        (local $slice i32)
        (if (i32.eqz (call $require_ready)) (then (return (i32.const 0))))
        (local.set $slice (call $alloc (i32.const 20)))
        (i32.store (local.get $slice) (i32.add (local.get $slice) (i32.const 8)))
        (i32.store offset=4 (local.get $slice) (i32.const 12))
        (memory.copy (i32.add (local.get $slice) (i32.const 8)) (i32.const 48) (i32.const 12))
        (local.get $slice))

    (func $convert (export "convert") (param $json i32) (result i32)
        (local $tuple i32)
        (local $array i32)
        (if (i32.ne (i32.load8_u (local.get $json)) (i32.const 123))
            (then
                (call $emit_condition (i32.const 3))
                (return (i32.const 0))))
        (local.set $tuple (call $alloc (i32.const 24)))
        (local.set $array (call $alloc (i32.const 48)))
        (memory.copy (local.get $array) (i32.const 64) (i32.const 36))
        (i32.store (local.get $tuple) (i32.const 100))
        (i32.store offset=4 (local.get $tuple) (i32.const 200))
        (i32.store offset=8 (local.get $tuple) (i32.const 1))
        (i32.store offset=12 (local.get $tuple) (local.get $array))
        (i32.store offset=16 (local.get $tuple) (i32.const 4))
        (i32.store offset=20 (local.get $tuple) (i32.const 3))
        (local.get $tuple))

    (func (export "accumulate") (param $tuple i32) (param $start i32) (param $end i32) (result i32)
        (local $i i32)
        (local $el i32)
        (local $date i32)
        (local $up i32)
        (local $down i32)
        (local $out i32)
        (block $done
            (loop $next
                (br_if $done (i32.ge_u (local.get $i) (i32.load offset=20 (local.get $tuple))))
                (local.set $el
                    (i32.add
                        (i32.load offset=12 (local.get $tuple))
                        (i32.mul (local.get $i) (i32.const 12))))
                (local.set $date (i32.load (local.get $el)))
                (if (i32.and
                        (i32.ge_u (local.get $date) (local.get $start))
                        (i32.le_u (local.get $date) (local.get $end)))
                    (then
                        (local.set $up (i32.add (local.get $up) (i32.load offset=4 (local.get $el))))
                        (local.set $down
                            (i32.add (local.get $down) (i32.load offset=8 (local.get $el))))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $next)))
        (local.set $out (call $alloc (i32.const 8)))
        (i32.store (local.get $out) (local.get $up))
        (i32.store offset=4 (local.get $out) (local.get $down))
        (local.get $out))

    (func (export "convertReporting") (param $json i32) (result i32)
        (local $tuple i32)
        (local.set $tuple (call $convert (local.get $json)))
        (call $emit_condition (i32.const 3))
        (local.get $tuple))

    (func (export "accumulateReporting") (param $tuple i32) (param $start i32) (param $end i32)
        (result i32)
        (local $out i32)
        (local.set $out (call $alloc (i32.const 8)))
        (call $emit_condition (i32.const 3))
        (local.get $out))

    (func (export "shout")
        (call $console (i32.const 120) (i32.const 4))
        (call $emit_response (i32.const 0) (i32.const 120) (i32.const 2)))

    (func (export "ping")
        (i32.store (i32.const 128) (i32.const 99))
        (call $resolve (i32.const 128) (i32.const 12))
        (call $emit_log (i32.const 32) (i32.const 5))
        (call $console (i32.const 32) (i32.const 5)))

    (func (export "broken")
        (call $resolve (i32.const 128) (i32.const 2)))
)
"#;

/// Compile the store module.
pub fn store_module_bytes() -> Vec<u8> {
    wat::parse_str(STORE_MODULE).expect("Failed to parse WAT")
}

/// Create a runtime with the testing preset.
pub fn runtime() -> WasmRuntime {
    WasmRuntime::new(WasmRuntimeConfig::testing()).expect("Failed to create runtime")
}

/// Bind the store module with `config`, collecting diagnostics in memory.
pub fn bind_with(config: BindingConfig) -> (ModuleBinding, Arc<MemorySink>) {
    let runtime = runtime();
    let module = runtime
        .compile("store", &store_module_bytes())
        .expect("Failed to compile module");
    let sink = Arc::new(MemorySink::new());
    let binding = ModuleBinding::instantiate(&runtime, &module, config, sink.clone())
        .expect("Failed to bind module");
    (binding, sink)
}

/// Bind the store module with the default names.
pub fn bind() -> (ModuleBinding, Arc<MemorySink>) {
    bind_with(BindingConfig::default())
}

/// Bind and initialize with an empty snapshot.
pub fn bind_ready() -> (ModuleBinding, Arc<MemorySink>) {
    let (mut binding, sink) = bind();
    binding.initialize(&[]).expect("Failed to initialize");
    (binding, sink)
}
