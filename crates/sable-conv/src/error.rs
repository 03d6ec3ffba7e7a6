use sable_backend::ConvAlgorithm;

/// Everything that can abort a forward-convolution call.
///
/// There is no local recovery or retry: each variant is terminal for
/// the call that raised it, and the message names the failing stage.
/// Failures before the compute invocation leave the output untouched;
/// a failure during it may leave the output partially written.
#[derive(Debug, thiserror::Error)]
pub enum ConvError {
    #[error(
        "input and kernel must have the same stack size: \
         input carries {input} channels, kernel expects {kernel}"
    )]
    ShapeMismatch { input: usize, kernel: usize },

    #[error("error preparing output buffer: {0}")]
    OutputPreparation(String),

    #[error("error selecting convolution algorithm: {0}")]
    AlgorithmSelection(String),

    #[error("error querying free device memory: {0}")]
    MemoryQuery(String),

    #[error("error querying workspace size for {algo}: {msg}")]
    WorkspaceSize { algo: ConvAlgorithm, msg: String },

    #[error("could not acquire {nbytes} bytes of workspace for {algo}")]
    WorkspaceAllocation { nbytes: usize, algo: ConvAlgorithm },

    #[error("error during convolution: {0}")]
    Execution(String),

    #[error(
        "backend version {version} does not support kernels larger than the \
         input in any spatial dimension, even when padding would cover the \
         difference; upgrade the backend library"
    )]
    VersionLimitation { version: u32 },
}
