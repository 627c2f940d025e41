//! Fixed support helpers shared by every generated package.

use std::sync::Arc;

use crate::helper::{Helper, HelperSide};

pub fn gen_tag() -> Arc<Helper> {
    Arc::new(
        Helper::new(
            "cgoGenTag",
            HelperSide::CHeader,
            "#pragma once\n#include <stdlib.h>\n\n#define __CGOGEN 1\n",
        )
        .describe("Marks headers produced by the generator."),
    )
}

pub fn helpers_include() -> Arc<Helper> {
    Arc::new(
        Helper::new(
            "cgoHelpersInclude",
            HelperSide::CSource,
            "#include \"cgo_helpers.h\"\n",
        )
        .require(gen_tag()),
    )
}

pub fn slice_header() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "sliceHeader",
            r#"type sliceHeader struct {
	Data unsafe.Pointer
	Len  int
	Cap  int
}
"#,
        )
        .describe("sliceHeader is the runtime representation of a slice.")
        .import("unsafe"),
    )
}

pub fn string_header() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "stringHeader",
            r#"type stringHeader struct {
	Data unsafe.Pointer
	Len  int
}
"#,
        )
        .describe("stringHeader is the runtime representation of a string.")
        .import("unsafe"),
    )
}

pub fn raw_string() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "RawString",
            r#"type RawString string

// Copy returns a Go-managed copy of raw string.
func (raw RawString) Copy() string {
	if len(raw) == 0 {
		return ""
	}
	h := (*stringHeader)(unsafe.Pointer(&raw))
	return C.GoStringN((*C.char)(h.Data), C.int(h.Len))
}
"#,
        )
        .describe("RawString represents a string backed by data on the C side.")
        .require(string_header())
        .import("unsafe"),
    )
}

pub fn safe_string() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "safeString",
            r#"func safeString(str string) string {
	if len(str) > 0 && str[len(str)-1] != '\x00' {
		str = str + "\x00"
	} else if len(str) == 0 {
		str = "\x00"
	}
	return str
}
"#,
        )
        .describe("safeString ensures that the string is NULL-terminated, a NULL-terminated copy is created otherwise."),
    )
}

pub fn alloc_failed() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "cgoAllocFailed",
            r#"func cgoAllocFailed(size int) {
	fmt.Fprintf(os.Stderr, "cgo: failed to allocate %d bytes of C memory\n", size)
	os.Exit(2)
}
"#,
        )
        .describe("cgoAllocFailed reports a failed C allocation and terminates the process.")
        .import("fmt")
        .import("os"),
    )
}

pub fn ref_registry() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "cgoRefRegistry",
            r#"type cgoRefRegistry struct {
	mux     sync.Mutex
	index   map[unsafe.Pointer]int
	entries []cgoRefEntry
	vacant  []int
}

type cgoRefEntry struct {
	ptr   unsafe.Pointer
	count int
}

var cgoRefs = &cgoRefRegistry{index: make(map[unsafe.Pointer]int)}

// Register starts counting ptr with a single reference.
func (r *cgoRefRegistry) Register(ptr unsafe.Pointer) {
	if ptr == nil {
		return
	}
	r.mux.Lock()
	defer r.mux.Unlock()
	if slot, ok := r.index[ptr]; ok {
		r.entries[slot].count = 1
		return
	}
	var slot int
	if n := len(r.vacant); n > 0 {
		slot = r.vacant[n-1]
		r.vacant = r.vacant[:n-1]
		r.entries[slot] = cgoRefEntry{ptr: ptr, count: 1}
	} else {
		slot = len(r.entries)
		r.entries = append(r.entries, cgoRefEntry{ptr: ptr, count: 1})
	}
	r.index[ptr] = slot
}

// Retain adds a reference to ptr and reports whether ptr is counted at all.
func (r *cgoRefRegistry) Retain(ptr unsafe.Pointer) bool {
	r.mux.Lock()
	defer r.mux.Unlock()
	slot, ok := r.index[ptr]
	if ok {
		r.entries[slot].count++
	}
	return ok
}

// Unref drops a reference to ptr without ever freeing it. Other
// references to ptr stay counted.
func (r *cgoRefRegistry) Unref(ptr unsafe.Pointer) {
	r.mux.Lock()
	defer r.mux.Unlock()
	slot, ok := r.index[ptr]
	if !ok {
		return
	}
	r.entries[slot].count--
	if r.entries[slot].count > 0 {
		return
	}
	delete(r.index, ptr)
	r.entries[slot] = cgoRefEntry{}
	r.vacant = append(r.vacant, slot)
}

// Release drops a reference to ptr and frees it with the last one.
// Memory that is not counted has a single owner and is freed at once.
func (r *cgoRefRegistry) Release(ptr unsafe.Pointer) {
	r.mux.Lock()
	if slot, ok := r.index[ptr]; ok {
		r.entries[slot].count--
		if r.entries[slot].count > 0 {
			r.mux.Unlock()
			return
		}
		delete(r.index, ptr)
		r.entries[slot] = cgoRefEntry{}
		r.vacant = append(r.vacant, slot)
	}
	r.mux.Unlock()
	C.free(ptr)
}
"#,
        )
        .describe("cgoRefRegistry counts references to C memory shared between wrappers.")
        .import("sync")
        .import("unsafe"),
    )
}

pub fn alloc_map() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "cgoAllocMap",
            r#"type cgoAllocMap struct {
	mux sync.RWMutex
	m   map[unsafe.Pointer]struct{}
}

var cgoAllocsUnknown = new(cgoAllocMap)

func (a *cgoAllocMap) Add(ptr unsafe.Pointer) {
	if ptr == nil {
		return
	}
	a.mux.Lock()
	if a.m == nil {
		a.m = make(map[unsafe.Pointer]struct{})
	}
	a.m[ptr] = struct{}{}
	a.mux.Unlock()
}

func (a *cgoAllocMap) Has(ptr unsafe.Pointer) bool {
	a.mux.RLock()
	_, ok := a.m[ptr]
	a.mux.RUnlock()
	return ok
}

func (a *cgoAllocMap) IsEmpty() bool {
	a.mux.RLock()
	isEmpty := len(a.m) == 0
	a.mux.RUnlock()
	return isEmpty
}

// Borrow moves every pointer of b into a. Both maps are locked in
// address order.
func (a *cgoAllocMap) Borrow(b *cgoAllocMap) {
	if b == nil || a == b {
		return
	}
	first, second := a, b
	if uintptr(unsafe.Pointer(b)) < uintptr(unsafe.Pointer(a)) {
		first, second = b, a
	}
	first.mux.Lock()
	second.mux.Lock()
	if len(b.m) > 0 && a.m == nil {
		a.m = make(map[unsafe.Pointer]struct{}, len(b.m))
	}
	for ptr := range b.m {
		a.m[ptr] = struct{}{}
		delete(b.m, ptr)
	}
	second.mux.Unlock()
	first.mux.Unlock()
}

// Free releases every pointer of a. Calling it again does nothing.
func (a *cgoAllocMap) Free() {
	a.mux.Lock()
	owned := a.m
	a.m = nil
	a.mux.Unlock()
	for ptr := range owned {
		cgoRefs.Release(ptr)
	}
}

// Disown empties a without freeing anything, dropping the reference a held
// on each pointer.
func (a *cgoAllocMap) Disown() {
	a.mux.Lock()
	owned := a.m
	a.m = nil
	a.mux.Unlock()
	for ptr := range owned {
		cgoRefs.Unref(ptr)
	}
}
"#,
        )
        .describe("cgoAllocMap stores pointers to C allocated memory for future reference.")
        .require(ref_registry())
        .import("sync")
        .import("unsafe"),
    )
}

/// Helpers emitted into every package regardless of what the bindings use.
pub fn always() -> Vec<Arc<Helper>> {
    vec![gen_tag(), helpers_include(), raw_string(), alloc_map()]
}

/// `unpackPCharString` borrows the Go string's bytes for the call.
pub fn unpack_string(safe: bool) -> Arc<Helper> {
    let helper = if safe {
        Helper::go(
            "unpackPCharString",
            r#"func unpackPCharString(str string) (*C.char, *cgoAllocMap) {
	str = safeString(str)
	h := (*stringHeader)(unsafe.Pointer(&str))
	return (*C.char)(h.Data), cgoAllocsUnknown
}
"#,
        )
        .require(safe_string())
    } else {
        Helper::go(
            "unpackPCharString",
            r#"func unpackPCharString(str string) (*C.char, *cgoAllocMap) {
	h := (*stringHeader)(unsafe.Pointer(&str))
	return (*C.char)(h.Data), cgoAllocsUnknown
}
"#,
        )
    };
    Arc::new(
        helper
            .describe("unpackPCharString represents the data from Go string as *C.char and avoids copying.")
            .require(string_header())
            .require(alloc_map())
            .import("unsafe"),
    )
}

/// `unpackMemoryPCharString` copies the string into C memory.
pub fn unpack_string_copy() -> Arc<Helper> {
    Arc::new(
        Helper::go(
            "unpackMemoryPCharString",
            r#"func unpackMemoryPCharString(str string) (*C.char, *cgoAllocMap) {
	allocs := new(cgoAllocMap)
	mem := C.CString(str)
	allocs.Add(unsafe.Pointer(mem))
	return mem, allocs
}
"#,
        )
        .describe("unpackMemoryPCharString copies the data from Go string into C memory.")
        .require(alloc_map())
        .import("unsafe"),
    )
}

/// `packPCharString` turns a C string into a Go string.
pub fn pack_string(safe: bool) -> Arc<Helper> {
    let helper = if safe {
        Helper::go(
            "packPCharString",
            r#"func packPCharString(p *C.char) string {
	if p == nil {
		return ""
	}
	return C.GoString(p)
}
"#,
        )
        .describe("packPCharString creates a Go string from *C.char, copying its contents.")
    } else {
        Helper::go(
            "packPCharString",
            r#"func packPCharString(p *C.char) (raw string) {
	if p != nil && *p != 0 {
		h := (*stringHeader)(unsafe.Pointer(&raw))
		h.Data = unsafe.Pointer(p)
		for *p != 0 {
			p = (*C.char)(unsafe.Pointer(uintptr(unsafe.Pointer(p)) + 1)) // p++
		}
		h.Len = int(uintptr(unsafe.Pointer(p)) - uintptr(h.Data))
	}
	return
}
"#,
        )
        .describe("packPCharString creates a Go string backed by *C.char and avoids copying.")
        .require(string_header())
        .import("unsafe")
    };
    Arc::new(helper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_map_frees_through_registry() {
        let helper = alloc_map();
        assert!(helper.source.contains("cgoRefs.Release(ptr)"));
        assert_eq!(helper.requires[0].name, "cgoRefRegistry");
    }

    #[test]
    fn test_disown_keeps_shared_counts() {
        let helper = alloc_map();
        assert!(helper.source.contains("cgoRefs.Unref(ptr)"));
        let registry = ref_registry();
        assert!(!registry.source.contains("Forget"));
        let unref = registry
            .source
            .split("func (r *cgoRefRegistry) Unref")
            .nth(1)
            .expect("Unref is emitted");
        let body = unref.split("\n}\n").next().unwrap_or_default();
        assert!(body.contains("count--"));
        assert!(!body.contains("C.free"));
    }

    #[test]
    fn test_string_helpers_follow_safety_option() {
        assert!(unpack_string(true).source.contains("safeString"));
        assert!(!unpack_string(false).source.contains("safeString"));
        assert!(pack_string(true).source.contains("C.GoString"));
        assert!(pack_string(false).source.contains("stringHeader"));
    }
}
