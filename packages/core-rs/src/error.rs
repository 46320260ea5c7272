use std::fmt;

/// Canonical error codes emitted by the engine. The string codes are stable
/// across backends so that higher layers can provide predictable error
/// handling; the integer codes are the legacy status values returned by
/// device wrappers.
pub mod codes {
    /// Operand shapes are incompatible for the requested operation.
    pub const DIMENSION: &str = "E_DIMENSION";
    /// The matrix-product backend reported a failure.
    pub const BLAS: &str = "E_BLAS";
    /// The accelerator runtime failed; the message carries its diagnostic.
    pub const DEVICE: &str = "E_DEVICE";
    /// A non-owning view reached an operation that needs owned storage.
    pub const VIEW_UNSUPPORTED: &str = "E_VIEW_UNSUPPORTED";
    /// A transposed alias reached an operation that needs canonical layout.
    pub const TRANSPOSE_UNSUPPORTED: &str = "E_TRANSPOSE_UNSUPPORTED";
    /// Reserved code without a canonical message.
    pub const UNSPECIFIED: &str = "E_UNSPECIFIED";
    /// Two operands disagree on their transpose flag.
    pub const TRANSPOSE_MISMATCH: &str = "E_TRANSPOSE_MISMATCH";
    /// The operation requires device residency that is absent.
    pub const NOT_ON_DEVICE: &str = "E_NOT_ON_DEVICE";
    /// The operation is not implemented for the operand combination.
    pub const UNSUPPORTED_OPERATION: &str = "E_UNSUPPORTED_OPERATION";
    /// Buffer length or index range does not fit the requested shape.
    pub const SHAPE: &str = "E_SHAPE";
    /// Host-side allocation failed.
    pub const ALLOCATION: &str = "E_ALLOCATION";
    /// The requested device ordinal or backend cannot be selected.
    pub const DEVICE_SELECT: &str = "E_DEVICE_SELECT";
    /// A sampling call ran before the random stream pool was seeded.
    pub const RNG_NOT_INITIALIZED: &str = "E_RNG_NOT_INITIALIZED";
    /// A device kernel failed while executing.
    pub const KERNEL: &str = "E_KERNEL";
    /// Reading or writing a persisted matrix failed.
    pub const IO: &str = "E_IO";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Dimension,
    Blas,
    Device,
    ViewUnsupported,
    TransposeUnsupported,
    Unspecified,
    TransposeMismatch,
    NotOnDevice,
    UnsupportedOperation,
    Shape,
    Allocation,
    DeviceSelect,
    RngNotInitialized,
    Kernel,
    Io,
}

impl ErrorKind {
    const ALL: [ErrorKind; 15] = [
        ErrorKind::Dimension,
        ErrorKind::Blas,
        ErrorKind::Device,
        ErrorKind::ViewUnsupported,
        ErrorKind::TransposeUnsupported,
        ErrorKind::Unspecified,
        ErrorKind::TransposeMismatch,
        ErrorKind::NotOnDevice,
        ErrorKind::UnsupportedOperation,
        ErrorKind::Shape,
        ErrorKind::Allocation,
        ErrorKind::DeviceSelect,
        ErrorKind::RngNotInitialized,
        ErrorKind::Kernel,
        ErrorKind::Io,
    ];

    /// Legacy negative status code.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Dimension => -1,
            ErrorKind::Blas => -2,
            ErrorKind::Device => -3,
            ErrorKind::ViewUnsupported => -4,
            ErrorKind::TransposeUnsupported => -5,
            ErrorKind::Unspecified => -6,
            ErrorKind::TransposeMismatch => -7,
            ErrorKind::NotOnDevice => -8,
            ErrorKind::UnsupportedOperation => -9,
            ErrorKind::Shape => -10,
            ErrorKind::Allocation => -11,
            ErrorKind::DeviceSelect => -12,
            ErrorKind::RngNotInitialized => -13,
            ErrorKind::Kernel => -14,
            ErrorKind::Io => -15,
        }
    }

    pub fn from_code(code: i32) -> Option<ErrorKind> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Dimension => codes::DIMENSION,
            ErrorKind::Blas => codes::BLAS,
            ErrorKind::Device => codes::DEVICE,
            ErrorKind::ViewUnsupported => codes::VIEW_UNSUPPORTED,
            ErrorKind::TransposeUnsupported => codes::TRANSPOSE_UNSUPPORTED,
            ErrorKind::Unspecified => codes::UNSPECIFIED,
            ErrorKind::TransposeMismatch => codes::TRANSPOSE_MISMATCH,
            ErrorKind::NotOnDevice => codes::NOT_ON_DEVICE,
            ErrorKind::UnsupportedOperation => codes::UNSUPPORTED_OPERATION,
            ErrorKind::Shape => codes::SHAPE,
            ErrorKind::Allocation => codes::ALLOCATION,
            ErrorKind::DeviceSelect => codes::DEVICE_SELECT,
            ErrorKind::RngNotInitialized => codes::RNG_NOT_INITIALIZED,
            ErrorKind::Kernel => codes::KERNEL,
            ErrorKind::Io => codes::IO,
        }
    }

    /// Message used when a status code arrives without further context.
    pub fn canonical_message(self) -> &'static str {
        match self {
            ErrorKind::Dimension => "Incompatible matrix dimensions.",
            ErrorKind::Blas => "BLAS error.",
            ErrorKind::Device => "Device error.",
            ErrorKind::ViewUnsupported => "Operation not supported on views.",
            ErrorKind::TransposeUnsupported => "Operation not supported on transposed matrices.",
            ErrorKind::Unspecified => "",
            ErrorKind::TransposeMismatch => "Incompatible transposedness.",
            ErrorKind::NotOnDevice => "Matrix is not in device memory.",
            ErrorKind::UnsupportedOperation => "Operation not supported.",
            ErrorKind::Shape => "Shape does not match buffer or index range.",
            ErrorKind::Allocation => "Allocation failed.",
            ErrorKind::DeviceSelect => "Invalid device selection.",
            ErrorKind::RngNotInitialized => "Random stream pool has not been seeded.",
            ErrorKind::Kernel => "Device kernel failed.",
            ErrorKind::Io => "Matrix file could not be read or written.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error returned by every device operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct MatError {
    kind: ErrorKind,
    message: String,
}

impl MatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Converts a legacy status code. Only `Device` failures carry the
    /// backend diagnostic; unknown codes become `Unspecified`.
    pub fn from_code(code: i32, backend_message: Option<&str>) -> Self {
        let kind = ErrorKind::from_code(code).unwrap_or(ErrorKind::Unspecified);
        let message = match (kind, backend_message) {
            (ErrorKind::Device, Some(detail)) => format!("CUDA error: {detail}"),
            _ => kind.canonical_message().to_string(),
        };
        Self { kind, message }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type MatResult<T> = Result<T, MatError>;

pub fn dimension(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Dimension, message)
}

pub fn blas(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Blas, message)
}

pub fn device(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Device, message)
}

pub fn view_unsupported(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::ViewUnsupported, message)
}

pub fn transpose_unsupported(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::TransposeUnsupported, message)
}

pub fn transpose_mismatch(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::TransposeMismatch, message)
}

pub fn not_on_device(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::NotOnDevice, message)
}

pub fn unsupported(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::UnsupportedOperation, message)
}

pub fn shape(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Shape, message)
}

pub fn allocation(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Allocation, message)
}

pub fn device_select(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::DeviceSelect, message)
}

pub fn rng_not_initialized(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::RngNotInitialized, message)
}

pub fn kernel(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Kernel, message)
}

pub fn io(message: impl Into<String>) -> MatError {
    MatError::new(ErrorKind::Io, message)
}
