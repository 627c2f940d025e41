//! Level-by-level conversion plans.

use tether_shape::{BaseKind, Dim, HostShape, NativeBase, NativeShape};

use crate::error::{GenError, GenResult};

/// One container level peeled by a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    /// A fixed array, written in place inside its parent.
    Array(Dim),
    /// A dynamic view: a separately allocated buffer behind a pointer.
    View,
}

/// What happens to each element once every level is peeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseStep {
    /// Identical layout on both sides; bytes are reinterpreted.
    Plain,
    /// A host pointer stored as a native pointer.
    PlainPointer,
    /// A top-level string whose bytes are lent for one call.
    StringBorrow,
    /// A string inside a container, copied into native memory.
    StringCopy,
    /// A struct wrapper stored by value.
    StructValue,
    /// A struct wrapper stored as a pointer to its native memory.
    StructRef { host_value: bool },
    /// A function pointer.
    Callback,
}

/// How a (host, native) pair is marshalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub host: HostShape,
    pub native: NativeShape,
    pub levels: Vec<Level>,
    pub base: BaseStep,
}

impl ConversionPlan {
    pub fn new(host: &HostShape, native: &NativeShape) -> GenResult<Self> {
        if host.outer.len() != native.outer.len()
            || host
                .outer
                .iter()
                .zip(&native.outer)
                .any(|(h, n)| h.extent() != n.extent())
        {
            return Err(GenError::unsupported(format!(
                "array dimensions of {} and {} differ",
                host, native
            )));
        }
        if native.pointers < host.views {
            return Err(GenError::unsupported(format!(
                "{} has fewer pointers than {} has views",
                native, host
            )));
        }

        let mut levels: Vec<Level> = host.outer.iter().cloned().map(Level::Array).collect();
        levels.extend(std::iter::repeat(Level::View).take(host.views as usize));

        let element = native.at_level(levels.len());
        let base = base_step(host, &element, levels.is_empty())?;
        Ok(ConversionPlan {
            host: host.clone(),
            native: native.clone(),
            levels,
            base,
        })
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_leveled(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn host_at(&self, level: usize) -> HostShape {
        self.host.at_level(level)
    }

    pub fn native_at(&self, level: usize) -> NativeShape {
        self.native.at_level(level)
    }

    /// Native shape of the elements once every level is peeled.
    pub fn native_element(&self) -> NativeShape {
        self.native.at_level(self.depth())
    }

    pub fn host_element(&self) -> HostShape {
        self.host.at_level(self.depth())
    }

    pub fn views_only(&self) -> bool {
        self.levels.iter().all(|level| *level == Level::View)
    }

    pub fn arrays_only(&self) -> bool {
        self.levels.iter().all(|level| matches!(level, Level::Array(_)))
    }

    /// Whether elements can be read and written without per-element work.
    pub fn is_plain(&self) -> bool {
        self.base == BaseStep::Plain
    }
}

fn base_step(host: &HostShape, element: &NativeShape, top_level: bool) -> GenResult<BaseStep> {
    let visible = element.rendered_pointers();
    match host.kind {
        BaseKind::Function => {
            if !top_level {
                return Err(GenError::unsupported(format!(
                    "callback {} cannot be stored in a container",
                    host.base_name
                )));
            }
            if !matches!(element.base, NativeBase::Function(_)) {
                return Err(GenError::unsupported(format!(
                    "callback {} does not map to a function pointer",
                    host.base_name
                )));
            }
            Ok(BaseStep::Callback)
        }
        BaseKind::Struct => match (host.pointers, element.pointers) {
            (0, 0) => Ok(BaseStep::StructValue),
            (0, 1) => Ok(BaseStep::StructRef { host_value: true }),
            (1, 1) => Ok(BaseStep::StructRef { host_value: false }),
            _ => Err(GenError::unsupported(format!(
                "{} cannot hold {}",
                host, element
            ))),
        },
        BaseKind::Plain | BaseKind::Enum if host.is_string() => {
            let is_char = matches!(element.base, NativeBase::Builtin { .. });
            if !is_char || element.pointers != host.pointers + 1 || !element.inner.is_empty() {
                return Err(GenError::unsupported(format!(
                    "string {} does not map to {}",
                    host, element
                )));
            }
            if host.pointers > 0 {
                return Err(GenError::unsupported(format!(
                    "pointer to string {} is not supported",
                    host
                )));
            }
            Ok(if top_level {
                BaseStep::StringBorrow
            } else {
                BaseStep::StringCopy
            })
        }
        BaseKind::Plain | BaseKind::Enum => {
            if visible != host.pointers {
                return Err(GenError::unsupported(format!(
                    "pointer depth of {} does not match {}",
                    host, element
                )));
            }
            if host.inner.len() != element.inner.len() {
                return Err(GenError::unsupported(format!(
                    "inner arrays of {} do not match {}",
                    host, element
                )));
            }
            Ok(if host.pointers == 0 {
                BaseStep::Plain
            } else {
                BaseStep::PlainPointer
            })
        }
    }
}
