//! IR Types
//!
//! The type model is deliberately small: it only distinguishes what the
//! ownership-aware passes need to know about a value (is it reference
//! counted, is it an address, is it a function and with which conventions).

/// Type of an IR value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    /// Trivial integer
    Int,
    /// Reference-counted object
    Object,
    /// Reference-counted heap box holding a value of the inner type
    Box(Box<IrType>),
    /// Address of a value of the inner type
    Address(Box<IrType>),
    /// Function value
    Function(Box<FunctionType>),
}

impl IrType {
    /// Create a box type
    pub fn boxed(inner: IrType) -> Self {
        IrType::Box(Box::new(inner))
    }

    /// Create an address type
    pub fn address(inner: IrType) -> Self {
        IrType::Address(Box::new(inner))
    }

    /// Create a function type
    pub fn function(ty: FunctionType) -> Self {
        IrType::Function(Box::new(ty))
    }

    pub fn is_address(&self) -> bool {
        matches!(self, IrType::Address(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, IrType::Function(_))
    }

    /// Get the function type if this is a function value
    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            IrType::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Get the pointee type of an address or the contents of a box
    pub fn element(&self) -> Option<&IrType> {
        match self {
            IrType::Address(inner) | IrType::Box(inner) => Some(inner),
            _ => None,
        }
    }

    /// Check if values of this type carry a reference count
    pub fn is_reference_counted(&self) -> bool {
        match self {
            IrType::Object | IrType::Box(_) => true,
            IrType::Function(f) => f.has_context(),
            IrType::Int | IrType::Address(_) => false,
        }
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::Int => write!(f, "Int"),
            IrType::Object => write!(f, "Object"),
            IrType::Box(inner) => write!(f, "box<{}>", inner),
            IrType::Address(inner) => write!(f, "*{}", inner),
            IrType::Function(func) => write!(f, "{}", func),
        }
    }
}

/// How a function value is represented at the machine level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionRepr {
    /// Context-free function pointer
    Thin,
    /// Function pointer plus a reference-counted context
    Thick,
    /// Method with a self parameter
    Method,
    /// Closure body implementation
    Closure,
    /// Protocol witness implementation
    WitnessMethod,
    /// Foreign C function pointer
    CFunctionPointer,
    /// Foreign method dispatched through the Objective-C runtime
    ObjCMethod,
    /// Foreign block
    Block,
}

impl FunctionRepr {
    /// Foreign conventions cannot have their bodies spliced into IR callers
    pub fn is_foreign(&self) -> bool {
        matches!(
            self,
            FunctionRepr::CFunctionPointer | FunctionRepr::ObjCMethod | FunctionRepr::Block
        )
    }
}

impl std::fmt::Display for FunctionRepr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FunctionRepr::Thin => "thin",
            FunctionRepr::Thick => "thick",
            FunctionRepr::Method => "method",
            FunctionRepr::Closure => "closure",
            FunctionRepr::WitnessMethod => "witness_method",
            FunctionRepr::CFunctionPointer => "c",
            FunctionRepr::ObjCMethod => "objc_method",
            FunctionRepr::Block => "block",
        };
        write!(f, "{}", s)
    }
}

/// Ownership convention of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamConvention {
    /// Callee consumes the value
    DirectOwned,
    /// Caller keeps the value alive for the duration of the call
    DirectGuaranteed,
    /// No ownership is transferred
    DirectUnowned,
    /// Callee consumes the value stored at the address
    IndirectIn,
    /// Value at the address is guaranteed for the duration of the call
    IndirectInGuaranteed,
    /// Value at the address is mutated in place
    IndirectInout,
}

impl ParamConvention {
    pub fn is_indirect(&self) -> bool {
        matches!(
            self,
            ParamConvention::IndirectIn
                | ParamConvention::IndirectInGuaranteed
                | ParamConvention::IndirectInout
        )
    }

    /// Check if the callee takes ownership of the argument
    pub fn is_consumed(&self) -> bool {
        matches!(self, ParamConvention::DirectOwned | ParamConvention::IndirectIn)
    }

    pub fn is_guaranteed(&self) -> bool {
        matches!(
            self,
            ParamConvention::DirectGuaranteed | ParamConvention::IndirectInGuaranteed
        )
    }
}

impl std::fmt::Display for ParamConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParamConvention::DirectOwned => "@owned",
            ParamConvention::DirectGuaranteed => "@guaranteed",
            ParamConvention::DirectUnowned => "@unowned",
            ParamConvention::IndirectIn => "@in",
            ParamConvention::IndirectInGuaranteed => "@in_guaranteed",
            ParamConvention::IndirectInout => "@inout",
        };
        write!(f, "{}", s)
    }
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub ty: IrType,
    pub convention: ParamConvention,
}

impl Param {
    pub fn new(ty: IrType, convention: ParamConvention) -> Self {
        Self { ty, convention }
    }

    pub fn owned(ty: IrType) -> Self {
        Self::new(ty, ParamConvention::DirectOwned)
    }

    pub fn guaranteed(ty: IrType) -> Self {
        Self::new(ty, ParamConvention::DirectGuaranteed)
    }
}

/// Signature of a function value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub repr: FunctionRepr,
    pub params: Vec<Param>,
    pub result: Option<IrType>,
    /// The function value may not escape the current scope
    pub noescape: bool,
    /// The context is borrowed by an application rather than consumed
    pub callee_guaranteed: bool,
}

impl FunctionType {
    /// Create an escaping function type with an owned context
    pub fn new(repr: FunctionRepr, params: Vec<Param>, result: Option<IrType>) -> Self {
        Self {
            repr,
            params,
            result,
            noescape: false,
            callee_guaranteed: false,
        }
    }

    /// Create a thin function type
    pub fn thin(params: Vec<Param>, result: Option<IrType>) -> Self {
        Self::new(FunctionRepr::Thin, params, result)
    }

    /// Create a thick function type
    pub fn thick(params: Vec<Param>, result: Option<IrType>) -> Self {
        Self::new(FunctionRepr::Thick, params, result)
    }

    /// Return a copy with the escapability changed
    pub fn with_noescape(&self, noescape: bool) -> Self {
        Self {
            noescape,
            ..self.clone()
        }
    }

    /// Return a copy with a different representation
    pub fn with_repr(&self, repr: FunctionRepr) -> Self {
        Self {
            repr,
            ..self.clone()
        }
    }

    /// Return a copy whose context is borrowed by applications
    pub fn with_callee_guaranteed(&self, callee_guaranteed: bool) -> Self {
        Self {
            callee_guaranteed,
            ..self.clone()
        }
    }

    /// Check if a function value of this type carries a context
    pub fn has_context(&self) -> bool {
        self.repr == FunctionRepr::Thick
    }

    /// Compare two signatures ignoring escapability
    pub fn same_ignoring_escape(&self, other: &FunctionType) -> bool {
        self.with_noescape(false) == other.with_noescape(false)
    }
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.repr)?;
        if self.noescape {
            write!(f, " @noescape")?;
        }
        if self.callee_guaranteed {
            write!(f, " @callee_guaranteed")?;
        }
        write!(f, " (")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", param.convention, param.ty)?;
        }
        write!(f, ") -> ")?;
        match &self.result {
            Some(ty) => write!(f, "{}", ty),
            None => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_ignoring_escape() {
        let escaping = FunctionType::thick(vec![Param::owned(IrType::Object)], None);
        let noescape = escaping.with_noescape(true);
        assert_ne!(escaping, noescape);
        assert!(escaping.same_ignoring_escape(&noescape));

        let other_result = FunctionType::thick(vec![Param::owned(IrType::Object)], Some(IrType::Int));
        assert!(!escaping.same_ignoring_escape(&other_result.with_noescape(true)));
    }

    #[test]
    fn test_reference_counted() {
        assert!(IrType::Object.is_reference_counted());
        assert!(IrType::boxed(IrType::Int).is_reference_counted());
        assert!(!IrType::address(IrType::Object).is_reference_counted());
        assert!(!IrType::function(FunctionType::thin(vec![], None)).is_reference_counted());
        assert!(IrType::function(FunctionType::thick(vec![], None)).is_reference_counted());
    }

    #[test]
    fn test_convention_categories() {
        assert!(ParamConvention::DirectOwned.is_consumed());
        assert!(ParamConvention::IndirectIn.is_consumed());
        assert!(ParamConvention::IndirectIn.is_indirect());
        assert!(!ParamConvention::DirectGuaranteed.is_consumed());
        assert!(ParamConvention::IndirectInGuaranteed.is_guaranteed());
    }

    #[test]
    fn test_function_type_display() {
        let ty = FunctionType::thick(vec![Param::guaranteed(IrType::Object)], Some(IrType::Int))
            .with_noescape(true);
        assert_eq!(format!("{}", ty), "@thick @noescape (@guaranteed Object) -> Int");
    }

    #[test]
    fn test_foreign_repr() {
        assert!(FunctionRepr::ObjCMethod.is_foreign());
        assert!(FunctionRepr::Block.is_foreign());
        assert!(!FunctionRepr::Method.is_foreign());
    }
}
