use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use graphport_core::{
    ArtifactMetadata, ArtifactSignature, Backend, BackendCapabilities, BinaryFn, CategoryTable,
    CompiledArtifact, Constant, DType, Dim, EntryPoint, Export, Function, Instruction, PrimOp, Program,
    Released, RtTensor, RuntimeFn, TableLayout, TensorSpec, TensorType, FORMAT_VERSION, STATUS_OK,
};
use graphport_runtime::{
    spawn_session, KernelBackend, LoadError, RunError, Session, SessionPool, STATUS_KERNEL_FAULT,
};
use tempfile::TempDir;

fn artifact(
    signature: ArtifactSignature,
    function: Function,
    constants: Vec<Constant>,
) -> CompiledArtifact {
    CompiledArtifact {
        metadata: ArtifactMetadata {
            format_version: FORMAT_VERSION,
            producer: "tests".into(),
            function: function.name.clone(),
            entry_symbol: format!("run_{}", function.name),
            signature,
            opt_level: 0,
        },
        program: Program {
            exports: vec![Export {
                symbol: format!("run_{}", function.name),
                function: function.name.clone(),
            }],
            functions: vec![function],
            constants,
        },
    }
}

/// `z = x + y` over `[?, 3]` i64 tensors.
fn adder() -> CompiledArtifact {
    let ty = TensorType::ranked(DType::I64, [Dim::Unknown, Dim::Known(3)]);
    artifact(
        ArtifactSignature {
            inputs: vec![TensorSpec::new("x", ty.clone()), TensorSpec::new("y", ty.clone())],
            outputs: vec![TensorSpec::new("z", ty)],
        },
        Function {
            name: "add".into(),
            num_slots: 3,
            inputs: vec![0, 1],
            outputs: vec![2],
            body: vec![Instruction::Exec {
                op: PrimOp::Binary(BinaryFn::Add),
                srcs: vec![0, 1],
                dst: 2,
            }],
        },
        vec![],
    )
}

fn write(dir: &TempDir, name: &str, a: &CompiledArtifact) -> Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, a.encode()?)?;
    Ok(path)
}

#[test]
fn open_and_run_from_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write(&dir, "add.gpa", &adder())?;
    let mut session = Session::open(&path, "run_add")?;
    ensure!(session.num_inputs() == 2 && session.num_outputs() == 1);
    ensure!(session.input_signature().contains("\"x\""));

    let x = RtTensor::from_slice([2, 3], &[1i64, 2, 3, 4, 5, 6])?;
    let y = RtTensor::from_slice([2, 3], &[10i64, 20, 30, 40, 50, 60])?;
    let out = session.run(&[x, y])?;
    let z = out.first().context("missing output")?;
    ensure!(z.dims() == [2, 3]);
    ensure!(z.to_vec::<i64>()? == [11, 22, 33, 44, 55, 66]);
    session.close();
    Ok(())
}

#[test]
fn unknown_symbol_is_a_load_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write(&dir, "add.gpa", &adder())?;
    let err = Session::open(&path, "run_mul").err().context("expected failure")?;
    ensure!(matches!(err, LoadError::UnknownSymbol { .. }), "{err}");

    let missing = Session::open(dir.path().join("nope.gpa"), "run_add").err();
    ensure!(matches!(missing, Some(LoadError::Read { .. })));
    Ok(())
}

#[test]
fn strided_inputs_are_honoured() -> Result<()> {
    let mut session = Session::load(&KernelBackend, &adder(), "run_add")?;
    let bytes: Vec<u8> = [1i64, 2, 3, 4, 5, 6]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    // The 3x2 buffer viewed as its 2x3 transpose.
    let x = RtTensor::borrowed(DType::I64, [3, 2], &bytes)?.with_layout([2, 3], &[1, 2])?;
    let y = RtTensor::from_slice([3], &[0i64, 0, 0])?;
    let err = session.run(&[x.clone(), y]).unwrap_err();
    ensure!(matches!(err, RunError::SignatureMismatch { index: 1, .. }), "{err}");

    let zeros = RtTensor::from_slice([2, 3], &[0i64; 6])?;
    let out = session.run(&[x, zeros])?;
    ensure!(out[0].to_vec::<i64>()? == [1, 3, 5, 2, 4, 6]);
    Ok(())
}

#[test]
fn category_tables_are_resolved_at_load() -> Result<()> {
    let table = CategoryTable {
        keys: vec![1, 2, 3],
        values: vec!["cat".into(), "dog".into(), "human".into()],
        default_int: -1,
        default_string: "unknown".into(),
    };
    let signature = ArtifactSignature {
        inputs: vec![TensorSpec::new("k", TensorType::unranked(DType::I64))],
        outputs: vec![TensorSpec::new("v", TensorType::unranked(DType::String))],
    };
    let function = |table_index| Function {
        name: "cat".into(),
        num_slots: 2,
        inputs: vec![0],
        outputs: vec![1],
        body: vec![Instruction::Exec {
            op: PrimOp::CallRuntime {
                func: RuntimeFn::CategoryMapI64ToStr,
                table: table_index,
            },
            srcs: vec![0],
            dst: 1,
        }],
    };

    let good = artifact(
        signature.clone(),
        function(0),
        vec![table.encode(TableLayout::Int64ToString)?],
    );
    let mut session = Session::load(&KernelBackend, &good, "run_cat")?;
    let out = session.run(&[RtTensor::from_slice([3], &[1i64, 4, 2])?])?;
    ensure!(out[0].to_strings()? == ["cat", "unknown", "dog"]);

    let wrong_layout = artifact(
        signature.clone(),
        function(0),
        vec![table.encode(TableLayout::StringToInt64)?],
    );
    let err = Session::load(&KernelBackend, &wrong_layout, "run_cat").err();
    ensure!(matches!(err, Some(LoadError::Backend { .. })));

    let dangling = artifact(signature, function(3), vec![]);
    ensure!(Session::load(&KernelBackend, &dangling, "run_cat").is_err());
    Ok(())
}

#[test]
fn kernel_fault_surfaces_as_execution_fault() -> Result<()> {
    let ty = TensorType::fixed(DType::I32, &[2]);
    let divider = artifact(
        ArtifactSignature {
            inputs: vec![TensorSpec::new("a", ty.clone()), TensorSpec::new("b", ty.clone())],
            outputs: vec![TensorSpec::new("q", ty)],
        },
        Function {
            name: "div".into(),
            num_slots: 3,
            inputs: vec![0, 1],
            outputs: vec![2],
            body: vec![Instruction::Exec {
                op: PrimOp::Binary(BinaryFn::Div),
                srcs: vec![0, 1],
                dst: 2,
            }],
        },
        vec![],
    );
    let mut session = Session::load(&KernelBackend, &divider, "run_div")?;
    let a = RtTensor::from_slice([2], &[6i32, 7])?;
    let err = session
        .run(&[a.clone(), RtTensor::from_slice([2], &[2i32, 0])?])
        .unwrap_err();
    match err {
        RunError::ExecutionFault { status, detail } => {
            ensure!(status == STATUS_KERNEL_FAULT);
            ensure!(detail.contains("division by zero"), "{detail}");
        }
        other => anyhow::bail!("unexpected error {other}"),
    }

    // The session stays usable after a fault.
    let out = session.run(&[a, RtTensor::from_slice([2], &[2i32, 7])?])?;
    ensure!(out[0].to_vec::<i32>()? == [3, 1]);
    Ok(())
}

/// Entry point that counts its invocations and echoes its input.
struct Counting {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    signature: ArtifactSignature,
}

struct CountingBackend {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl Backend for CountingBackend {
    type Entry = Counting;

    fn name(&self) -> &'static str {
        "counting"
    }

    fn load(&self, artifact: &CompiledArtifact, _symbol: &str) -> graphport_core::Result<Counting> {
        Ok(Counting {
            calls: self.calls.clone(),
            delay: self.delay,
            signature: artifact.metadata.signature.clone(),
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_dynamic_shapes: true,
            supports_strided_inputs: true,
            reentrant_entry: false,
        }
    }
}

impl EntryPoint for Counting {
    fn signature(&self) -> &ArtifactSignature {
        &self.signature
    }

    fn invoke(&mut self, inputs: &[RtTensor<'_>], outputs: &mut [Option<RtTensor<'static>>]) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        outputs[0] = Some(inputs[0].clone().into_owned());
        STATUS_OK
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

fn echo() -> CompiledArtifact {
    let ty = TensorType::unranked(DType::F32);
    artifact(
        ArtifactSignature {
            inputs: vec![TensorSpec::new("x", ty.clone())],
            outputs: vec![TensorSpec::new("y", ty)],
        },
        Function {
            name: "echo".into(),
            num_slots: 1,
            inputs: vec![0],
            outputs: vec![0],
            body: vec![],
        },
        vec![],
    )
}

fn counting(delay: Duration) -> (CountingBackend, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        CountingBackend {
            calls: calls.clone(),
            delay,
        },
        calls,
    )
}

#[test]
fn rejected_calls_never_reach_the_entry_point() -> Result<()> {
    let (backend, calls) = counting(Duration::ZERO);
    let mut session = Session::load(&backend, &echo(), "run_echo")?;

    let err = session.run(&[]).unwrap_err();
    ensure!(err == RunError::ArityMismatch { expected: 1, got: 0 });
    let wrong_type = RtTensor::from_slice([1], &[1i64])?;
    ensure!(matches!(
        session.run(&[wrong_type]),
        Err(RunError::SignatureMismatch { index: 0, .. })
    ));
    ensure!(calls.load(Ordering::SeqCst) == 0);

    session.run(&[RtTensor::from_slice([2], &[1f32, 2.])?])?;
    ensure!(calls.load(Ordering::SeqCst) == 1);
    ensure!(session.runs() == 1);
    Ok(())
}

#[test]
fn echoed_output_keeps_shared_input_buffer_alive() -> Result<()> {
    let (backend, _calls) = counting(Duration::ZERO);
    let mut session = Session::load(&backend, &echo(), "run_echo")?;

    let x = RtTensor::from_slice([2], &[3f32, 4.])?;
    let outputs = session.run(std::slice::from_ref(&x))?;
    let y = outputs.into_iter().next().context("missing output")?;

    ensure!(x.destroy() == Released::Shared);
    ensure!(y.to_vec::<f32>()? == [3.0, 4.0]);
    ensure!(y.destroy() == Released::Owned { elements: 2 });
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_reports_deadline_and_close() -> Result<()> {
    let (backend, _calls) = counting(Duration::from_millis(200));
    let session = Session::load(&backend, &echo(), "run_echo")?;
    let (handle, join) = spawn_session(0, session, 4);

    let x = RtTensor::from_slice([1], &[1f32])?;
    let err = handle
        .run_with_deadline(vec![x.clone()], Duration::from_millis(10))
        .await
        .unwrap_err();
    ensure!(matches!(err, RunError::DeadlineExceeded(_)), "{err}");

    let ok = handle.run(vec![x.clone()]).await?;
    ensure!(ok.outputs[0].to_vec::<f32>()? == [1.0]);

    handle.close().await;
    join.await?;
    ensure!(handle.is_closed());
    ensure!(handle.run(vec![x]).await.unwrap_err() == RunError::Closed);
    Ok(())
}

#[tokio::test]
async fn pool_spreads_calls_round_robin() -> Result<()> {
    let mut counters = Vec::new();
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let (backend, calls) = counting(Duration::ZERO);
        sessions.push(Session::load(&backend, &echo(), "run_echo")?);
        counters.push(calls);
    }
    let pool = SessionPool::from_sessions(sessions, 8);
    ensure!(pool.len() == 2);

    for i in 0..4 {
        let out = pool.run(vec![RtTensor::from_slice([1], &[i as f32])?]).await?;
        ensure!(out.outputs[0].to_vec::<f32>()? == [i as f32]);
    }
    for calls in &counters {
        ensure!(calls.load(Ordering::SeqCst) == 2);
    }

    pool.close().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    ensure!(pool.run(vec![RtTensor::from_slice([1], &[0f32])?]).await.is_err());
    Ok(())
}
