//! Derive macros for the boid-flocks compute core.
//!
//! This crate provides one derive macro, [`GpuRecord`], which turns a plain
//! Rust record into the byte layout a WGSL kernel expects.
//!
//! # Usage
//!
//! The macro is re-exported from the main `boid_flocks` crate:
//!
//! ```ignore
//! use boid_flocks::prelude::*;
//!
//! #[derive(GpuRecord, Clone, Copy, Debug, PartialEq)]
//! struct Probe {
//!     position: Vec2,
//!     weight: f32,
//! }
//! ```
//!
//! # GPU Memory Layout
//!
//! WGSL aligns `vec2<f32>` to 8 bytes and `vec4<f32>` to 16, while the
//! Rust `[f32; N]` mirrors only need 4. The macro inserts `_padN` fields
//! wherever WGSL would leave a gap and rounds every struct up to 16 bytes so
//! arrays of records share the same stride on both sides.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Ident, Type};

/// Derive macro for kernel records.
///
/// For a record `AgentRecord` this generates:
///
/// - `AgentRecordGpu`, a `#[repr(C)]` `Pod` struct with explicit padding
/// - `impl GpuRecord for AgentRecord` carrying the WGSL struct source,
///   its size and the `to_gpu` / `from_gpu` conversions
/// - compile-time assertions that every field offset and the total size of
///   `AgentRecordGpu` equal the WGSL layout
///
/// # Supported Types
///
/// | Rust Type | WGSL Type | Size | Alignment |
/// |-----------|-----------|------|-----------|
/// | `Vec2` | `vec2<f32>` | 8 bytes | 8 bytes |
/// | `Vec4` | `vec4<f32>` | 16 bytes | 16 bytes |
/// | `f32` | `f32` | 4 bytes | 4 bytes |
/// | `u32` | `u32` | 4 bytes | 4 bytes |
/// | `i32` | `i32` | 4 bytes | 4 bytes |
///
/// # Generated Code
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
/// pub struct AgentRecordGpu {
///     pub flock_index: u32,
///     pub _pad0: f32,          // vec2 alignment
///     pub position: [f32; 2],
///     pub heading: [f32; 2],
///     pub speed: f32,
///     pub _pad1: f32,          // 16-byte stride
/// }
/// ```
///
/// # Panics
///
/// The macro panics at compile time if:
/// - Applied to an enum or union
/// - The struct uses tuple fields
/// - Any field has an unsupported type
#[proc_macro_derive(GpuRecord)]
pub fn derive_gpu_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let vis = &input.vis;
    let gpu_name = Ident::new(&format!("{}Gpu", name), Span::call_site());

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("GpuRecord derive only supports structs with named fields"),
        },
        _ => panic!("GpuRecord derive only supports structs"),
    };

    let mut layout = Layout::new(gpu_name.clone());
    let mut from_gpu_conversions = Vec::new();

    for field in fields.iter() {
        let field_name = field.ident.as_ref().expect("named field");
        let type_info = rust_type_info(&field.ty);

        let padding_needed = (type_info.align - (layout.offset % type_info.align)) % type_info.align;
        layout.pad(padding_needed);

        let conversion = generate_conversion(field_name, &field.ty);
        layout.field(field_name, &type_info, conversion);
        let reverse = generate_reverse_conversion(field_name, &field.ty);
        from_gpu_conversions.push(quote! { #field_name: #reverse });
    }

    // Array stride: round the struct up to vec4 alignment
    layout.pad((16 - (layout.offset % 16)) % 16);

    let Layout {
        offset,
        wgsl_fields,
        gpu_struct_fields,
        to_gpu_conversions,
        field_entries,
        offset_asserts,
        ..
    } = layout;

    let wgsl_name = name.to_string();
    let wgsl_struct = format!("struct {} {{\n{}\n}}", wgsl_name, wgsl_fields.join("\n"));
    let wgsl_size = offset;
    let wgsl_size_usize = offset as usize;

    let expanded = quote! {
        #[repr(C)]
        #[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
        #vis struct #gpu_name {
            #(pub #gpu_struct_fields),*
        }

        impl boid_flocks::records::GpuRecord for #name {
            type Gpu = #gpu_name;

            const WGSL_NAME: &'static str = #wgsl_name;
            const WGSL_STRUCT: &'static str = #wgsl_struct;
            const WGSL_SIZE: u32 = #wgsl_size;
            const GPU_FIELDS: &'static [(&'static str, u32)] = &[
                #(#field_entries),*
            ];

            fn to_gpu(&self) -> Self::Gpu {
                #gpu_name {
                    #(#to_gpu_conversions),*
                }
            }

            fn from_gpu(gpu: &Self::Gpu) -> Self {
                Self {
                    #(#from_gpu_conversions),*
                }
            }
        }

        const _: () = {
            assert!(::core::mem::size_of::<#gpu_name>() == #wgsl_size_usize);
            #(#offset_asserts)*
        };
    };

    TokenStream::from(expanded)
}

/// Running WGSL layout of the struct being derived.
struct Layout {
    gpu_name: Ident,
    /// Current WGSL offset in bytes
    offset: u32,
    padding_count: u32,
    wgsl_fields: Vec<String>,
    gpu_struct_fields: Vec<proc_macro2::TokenStream>,
    to_gpu_conversions: Vec<proc_macro2::TokenStream>,
    /// `(name, rust offset)` pairs, padding included
    field_entries: Vec<proc_macro2::TokenStream>,
    offset_asserts: Vec<proc_macro2::TokenStream>,
}

impl Layout {
    fn new(gpu_name: Ident) -> Self {
        Self {
            gpu_name,
            offset: 0,
            padding_count: 0,
            wgsl_fields: Vec::new(),
            gpu_struct_fields: Vec::new(),
            to_gpu_conversions: Vec::new(),
            field_entries: Vec::new(),
            offset_asserts: Vec::new(),
        }
    }

    fn field(&mut self, field_name: &Ident, type_info: &TypeInfo, conversion: proc_macro2::TokenStream) {
        let gpu_name = &self.gpu_name;
        let field_name_str = field_name.to_string();
        let offset = self.offset as usize;

        self.wgsl_fields
            .push(format!("    {}: {},", field_name_str, type_info.wgsl_type));
        let gpu_type = &type_info.gpu_type;
        self.gpu_struct_fields.push(quote! { #field_name: #gpu_type });
        self.to_gpu_conversions.push(quote! { #field_name: #conversion });
        self.field_entries.push(quote! {
            (#field_name_str, ::core::mem::offset_of!(#gpu_name, #field_name) as u32)
        });
        self.offset_asserts.push(quote! {
            assert!(::core::mem::offset_of!(#gpu_name, #field_name) == #offset);
        });
        self.offset += type_info.size;
    }

    /// Append `bytes / 4` scalar padding fields.
    ///
    /// Scalars rather than `array<f32, N>` keep the struct legal in the
    /// uniform address space, which requires 16-byte array strides.
    fn pad(&mut self, bytes: u32) {
        let gpu_name = &self.gpu_name;
        for _ in 0..bytes / 4 {
            let pad_name = Ident::new(&format!("_pad{}", self.padding_count), Span::call_site());
            let pad_name_str = format!("_pad{}", self.padding_count);
            self.padding_count += 1;

            self.wgsl_fields.push(format!("    {}: f32,", pad_name_str));
            self.gpu_struct_fields.push(quote! { #pad_name: f32 });
            self.to_gpu_conversions.push(quote! { #pad_name: 0.0 });
            self.field_entries.push(quote! {
                (#pad_name_str, ::core::mem::offset_of!(#gpu_name, #pad_name) as u32)
            });
            self.offset += 4;
        }
    }
}

/// Type metadata for GPU memory layout calculations.
struct TypeInfo {
    /// WGSL type name (e.g., "vec2<f32>")
    wgsl_type: &'static str,
    /// Rust type for the GPU struct (e.g., `[f32; 2]`)
    gpu_type: proc_macro2::TokenStream,
    /// Size in bytes
    size: u32,
    /// Required alignment in bytes
    align: u32,
}

/// Get type information for a Rust type.
fn rust_type_info(ty: &Type) -> TypeInfo {
    let type_str = quote!(#ty).to_string().replace(" ", "");

    match type_str.as_str() {
        "Vec2" | "glam::Vec2" => TypeInfo {
            wgsl_type: "vec2<f32>",
            gpu_type: quote! { [f32; 2] },
            size: 8,
            align: 8,
        },
        "Vec4" | "glam::Vec4" => TypeInfo {
            wgsl_type: "vec4<f32>",
            gpu_type: quote! { [f32; 4] },
            size: 16,
            align: 16,
        },
        "f32" => TypeInfo {
            wgsl_type: "f32",
            gpu_type: quote! { f32 },
            size: 4,
            align: 4,
        },
        "u32" => TypeInfo {
            wgsl_type: "u32",
            gpu_type: quote! { u32 },
            size: 4,
            align: 4,
        },
        "i32" => TypeInfo {
            wgsl_type: "i32",
            gpu_type: quote! { i32 },
            size: 4,
            align: 4,
        },
        _ => panic!("Unsupported type in GpuRecord struct: {}", type_str),
    }
}

/// Generate code to convert a field from Rust to GPU format.
fn generate_conversion(field_name: &Ident, ty: &Type) -> proc_macro2::TokenStream {
    let type_str = quote!(#ty).to_string().replace(" ", "");

    match type_str.as_str() {
        "Vec2" | "glam::Vec2" | "Vec4" | "glam::Vec4" => {
            quote! { self.#field_name.to_array() }
        }
        _ => {
            quote! { self.#field_name }
        }
    }
}

/// Generate code to convert a field from GPU format back to Rust.
fn generate_reverse_conversion(field_name: &Ident, ty: &Type) -> proc_macro2::TokenStream {
    let type_str = quote!(#ty).to_string().replace(" ", "");

    match type_str.as_str() {
        "Vec2" | "glam::Vec2" => {
            quote! { glam::Vec2::from_array(gpu.#field_name) }
        }
        "Vec4" | "glam::Vec4" => {
            quote! { glam::Vec4::from_array(gpu.#field_name) }
        }
        _ => {
            quote! { gpu.#field_name }
        }
    }
}
