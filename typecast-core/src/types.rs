#![forbid(unsafe_code)]

use crate::layout::TargetLayout;
use crate::registry::TypeRegistry;
use crate::template::TemplateInstantiator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    Void,
    /// Type of the null literal.
    NullPtr,
    String,
}

impl Primitive {
    pub const ARITHMETIC: [Primitive; 14] = [
        Primitive::Bool,
        Primitive::Char,
        Primitive::UChar,
        Primitive::Short,
        Primitive::UShort,
        Primitive::Int,
        Primitive::UInt,
        Primitive::Long,
        Primitive::ULong,
        Primitive::LongLong,
        Primitive::ULongLong,
        Primitive::Float,
        Primitive::Double,
        Primitive::LongDouble,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let p = match name {
            "bool" => Primitive::Bool,
            "char" | "signed char" => Primitive::Char,
            "unsigned char" => Primitive::UChar,
            "short" => Primitive::Short,
            "unsigned short" => Primitive::UShort,
            "int" => Primitive::Int,
            "unsigned int" | "unsigned" => Primitive::UInt,
            "long" => Primitive::Long,
            "unsigned long" | "size_t" | "std::size_t" => Primitive::ULong,
            "long long" => Primitive::LongLong,
            "unsigned long long" => Primitive::ULongLong,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "long double" => Primitive::LongDouble,
            "void" => Primitive::Void,
            "std::nullptr_t" | "nullptr_t" => Primitive::NullPtr,
            "string" | "std::string" => Primitive::String,
            _ => return None,
        };
        Some(p)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::UChar => "unsigned char",
            Primitive::Short => "short",
            Primitive::UShort => "unsigned short",
            Primitive::Int => "int",
            Primitive::UInt => "unsigned int",
            Primitive::Long => "long",
            Primitive::ULong => "unsigned long",
            Primitive::LongLong => "long long",
            Primitive::ULongLong => "unsigned long long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::LongDouble => "long double",
            Primitive::Void => "void",
            Primitive::NullPtr => "std::nullptr_t",
            Primitive::String => "std::string",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integral() || self.is_floating()
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Primitive::Bool
                | Primitive::Char
                | Primitive::UChar
                | Primitive::Short
                | Primitive::UShort
                | Primitive::Int
                | Primitive::UInt
                | Primitive::Long
                | Primitive::ULong
                | Primitive::LongLong
                | Primitive::ULongLong
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            Primitive::Float | Primitive::Double | Primitive::LongDouble
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Primitive::Bool
                | Primitive::UChar
                | Primitive::UShort
                | Primitive::UInt
                | Primitive::ULong
                | Primitive::ULongLong
        )
    }

    pub fn storage_bits(&self, layout: &TargetLayout) -> u16 {
        match self {
            Primitive::Bool | Primitive::Char | Primitive::UChar => 8,
            Primitive::Short | Primitive::UShort => 16,
            Primitive::Int | Primitive::UInt | Primitive::Float => 32,
            Primitive::Long | Primitive::ULong => layout.long_bits,
            Primitive::LongLong | Primitive::ULongLong | Primitive::Double => 64,
            Primitive::LongDouble => layout.long_double_bits,
            Primitive::Void => 0,
            Primitive::NullPtr => layout.pointer_bits,
            // pointer + size + capacity + inline buffer, roughly
            Primitive::String => layout.pointer_bits * 4,
        }
    }

    /// Bits of value precision. Signed integers lose one bit to the sign;
    /// floating types count their mantissa.
    pub fn significant_bits(&self, layout: &TargetLayout) -> u16 {
        match self {
            Primitive::Bool => 1,
            Primitive::Float => 24,
            Primitive::Double => 53,
            Primitive::LongDouble => {
                if layout.long_double_bits > 64 {
                    64
                } else {
                    53
                }
            }
            p if p.is_integral() && p.is_unsigned() => p.storage_bits(layout),
            p if p.is_integral() => p.storage_bits(layout) - 1,
            _ => 0,
        }
    }

    /// Integer conversion rank.
    fn rank(&self) -> u8 {
        match self {
            Primitive::Bool => 0,
            Primitive::Char | Primitive::UChar => 1,
            Primitive::Short | Primitive::UShort => 2,
            Primitive::Int | Primitive::UInt => 3,
            Primitive::Long | Primitive::ULong => 4,
            Primitive::LongLong | Primitive::ULongLong => 5,
            _ => 0,
        }
    }

    fn to_unsigned(self) -> Self {
        match self {
            Primitive::Char => Primitive::UChar,
            Primitive::Short => Primitive::UShort,
            Primitive::Int => Primitive::UInt,
            Primitive::Long => Primitive::ULong,
            Primitive::LongLong => Primitive::ULongLong,
            other => other,
        }
    }

    /// Integral promotion: anything ranked below `int` becomes `int`.
    pub fn promoted(self) -> Self {
        if self.is_integral() && self.rank() < Primitive::Int.rank() {
            Primitive::Int
        } else {
            self
        }
    }
}

/// Result type of a binary arithmetic operator over two arithmetic operands.
pub fn arithmetic_result(l: Primitive, r: Primitive, layout: &TargetLayout) -> Primitive {
    match (l.is_floating(), r.is_floating()) {
        (true, true) => {
            if r.significant_bits(layout) > l.significant_bits(layout) {
                r
            } else {
                l
            }
        }
        (true, false) => l,
        (false, true) => r,
        (false, false) => {
            let (l, r) = (l.promoted(), r.promoted());
            let (lw, rw) = (l.storage_bits(layout), r.storage_bits(layout));
            if lw != rw {
                return if lw > rw { l } else { r };
            }
            let wider = if r.rank() > l.rank() { r } else { l };
            if l.is_unsigned() || r.is_unsigned() {
                wider.to_unsigned()
            } else {
                wider
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Poison type for expressions whose recoverable check failed.
    Unknown,
    Primitive(Primitive),
    Class(ClassId),
    Pointer(Box<Type>),
    Reference(Box<Type>),
    Instance(InstanceId),
}

impl Type {
    pub fn pointer_to(ty: Type) -> Self {
        Type::Pointer(Box::new(ty))
    }

    pub fn reference_to(ty: Type) -> Self {
        match ty {
            r @ Type::Reference(_) => r,
            other => Type::Reference(Box::new(other)),
        }
    }

    pub fn strip_reference(&self) -> &Type {
        match self {
            Type::Reference(inner) => inner,
            other => other,
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            Type::Class(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        self.primitive().is_some_and(|p| p.is_arithmetic())
    }

    pub fn is_integral(&self) -> bool {
        self.primitive().is_some_and(|p| p.is_integral())
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// `void*`, the generic opaque pointer.
    pub fn is_opaque_pointer(&self) -> bool {
        matches!(self, Type::Pointer(inner) if **inner == Type::Primitive(Primitive::Void))
    }
}

pub fn display_type(ty: &Type, registry: &TypeRegistry, templates: &TemplateInstantiator) -> String {
    match ty {
        Type::Unknown => "<unknown>".to_string(),
        Type::Primitive(p) => p.name().to_string(),
        Type::Class(id) => registry.class(*id).name.clone(),
        Type::Pointer(inner) => format!("{}*", display_type(inner, registry, templates)),
        Type::Reference(inner) => format!("{}&", display_type(inner, registry, templates)),
        Type::Instance(id) => {
            let inst = templates.get(*id);
            let args = inst
                .args
                .iter()
                .map(|t| display_type(t, registry, templates))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}<{args}>", inst.template)
        }
    }
}
